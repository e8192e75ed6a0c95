//! Per-turn context threaded explicitly through the call chain
//!
//! A [`TurnContext`] is created when a turn begins and passed by reference to
//! the transport, its hooks and the provider. Nothing in this crate reads
//! credentials from globals or task-locals; if a hook needs the bearer token it
//! gets it from the context it was handed.

use crate::auth::{Authorization, AuthorizationContext};

/// Context for one logical request/response cycle
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    auth: Option<AuthorizationContext>,
}

impl TurnContext {
    /// A context without credentials
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(auth: AuthorizationContext) -> Self {
        Self { auth: Some(auth) }
    }

    /// Start a turn from a caller-supplied authorization description.
    ///
    /// Each call builds a fresh [`AuthorizationContext`], so refresh state
    /// never leaks between turns.
    pub fn for_authorization(authorization: Option<&Authorization>) -> Self {
        Self {
            auth: authorization.map(AuthorizationContext::from),
        }
    }

    pub fn auth(&self) -> Option<&AuthorizationContext> {
        self.auth.as_ref()
    }
}
