//! Transport hooks: request preparation and unauthorized-response handling
//!
//! A [`Transport`](crate::Transport) carries two optional hooks:
//!
//! 1. **prepare_request**: runs before every send, including the single retry.
//!    It receives the request and the turn's [`TurnContext`] and returns the
//!    request to send. The usual job is attaching an `Authorization` header.
//!
//! 2. **on_unauthorized**: runs when a response comes back with status 401.
//!    It sees the status, the raw body, the request that was rejected, the
//!    token presented with it and the context, and answers [`RetryDecision::Retry`] or
//!    [`RetryDecision::DoNotRetry`]. A retry is attempted at most once per
//!    request.
//!
//! Because prepare runs again before the retry, a hook that reads the token
//! from the context picks up whatever the unauthorized hook refreshed.
//!
//! # Bearer auth with refresh
//!
//! ```rust,no_run
//! use agent_turn::{Authorization, Transport, TransportConfig, TurnContext};
//!
//! # async fn example() -> agent_turn::Result<()> {
//! let transport = Transport::new(
//!     TransportConfig::builder().base_url("https://api.example.com/v1").build()?,
//! )?
//! .with_bearer_auth();
//!
//! let auth = Authorization::refreshable("expired-token", || async {
//!     Ok("new-token".to_string())
//! });
//! let ctx = TurnContext::for_authorization(Some(&auth));
//! # Ok(())
//! # }
//! ```
//!
//! # Custom hooks
//!
//! ```rust
//! use agent_turn::{RetryDecision, TransportHooks};
//!
//! let hooks = TransportHooks::new()
//!     .prepare_request(|mut request, _ctx| async move {
//!         request.set_header("x-request-source", "docs");
//!         Ok(request)
//!     })
//!     .on_unauthorized(|event| async move {
//!         // Only retry when the server hints the token expired
//!         if event.body.contains("expired") {
//!             Ok(RetryDecision::Retry)
//!         } else {
//!             Ok(RetryDecision::DoNotRetry)
//!         }
//!     });
//! ```

use crate::context::TurnContext;
use crate::transport::PreparedRequest;
use crate::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What to do after a 401
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    DoNotRetry,
}

/// Data handed to the unauthorized hook
#[derive(Clone)]
pub struct UnauthorizedEvent {
    pub status: u16,
    pub body: String,
    /// The prepared request the server rejected
    pub request: PreparedRequest,
    /// The context's bearer token when the rejected request was prepared
    pub token: Option<String>,
    pub context: TurnContext,
}

impl std::fmt::Debug for UnauthorizedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnauthorizedEvent")
            .field("status", &self.status)
            .field("body", &self.body)
            .field("request", &self.request)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("context", &self.context)
            .finish()
    }
}

/// Type-erased request preparation hook
pub type PrepareRequestHook = Arc<
    dyn Fn(PreparedRequest, TurnContext) -> Pin<Box<dyn Future<Output = Result<PreparedRequest>> + Send>>
        + Send
        + Sync,
>;

/// Type-erased unauthorized-response hook
pub type UnauthorizedHook = Arc<
    dyn Fn(UnauthorizedEvent) -> Pin<Box<dyn Future<Output = Result<RetryDecision>> + Send>>
        + Send
        + Sync,
>;

/// The pair of hooks a transport runs around each request
#[derive(Clone, Default)]
pub struct TransportHooks {
    pub prepare_request: Option<PrepareRequestHook>,
    pub on_unauthorized: Option<UnauthorizedHook>,
}

impl TransportHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks that attach the turn's bearer token and refresh it on 401
    pub fn bearer() -> Self {
        Self {
            prepare_request: Some(bearer_prepare_hook()),
            on_unauthorized: Some(refresh_on_unauthorized_hook()),
        }
    }

    /// Set the prepare hook, replacing any previous one
    pub fn prepare_request<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(PreparedRequest, TurnContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PreparedRequest>> + Send + 'static,
    {
        self.prepare_request = Some(Arc::new(move |request, ctx| Box::pin(hook(request, ctx))));
        self
    }

    /// Set the unauthorized hook, replacing any previous one
    pub fn on_unauthorized<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(UnauthorizedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RetryDecision>> + Send + 'static,
    {
        self.on_unauthorized = Some(Arc::new(move |event| Box::pin(hook(event))));
        self
    }

    pub(crate) async fn prepare(
        &self,
        request: PreparedRequest,
        ctx: &TurnContext,
    ) -> Result<PreparedRequest> {
        match &self.prepare_request {
            Some(hook) => hook(request, ctx.clone()).await,
            None => Ok(request),
        }
    }

    /// `None` when no unauthorized hook is installed
    pub(crate) async fn unauthorized(
        &self,
        event: UnauthorizedEvent,
    ) -> Option<Result<RetryDecision>> {
        match &self.on_unauthorized {
            Some(hook) => Some(hook(event).await),
            None => None,
        }
    }
}

impl std::fmt::Debug for TransportHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHooks")
            .field("prepare_request", &self.prepare_request.is_some())
            .field("on_unauthorized", &self.on_unauthorized.is_some())
            .finish()
    }
}

/// Prepare hook that sets `Authorization: Bearer <token>` from the context.
///
/// Requests from a turn without an authorization context pass through
/// untouched.
pub fn bearer_prepare_hook() -> PrepareRequestHook {
    Arc::new(|request, ctx| Box::pin(attach_bearer(request, ctx)))
}

/// Unauthorized hook that refreshes the rejected token once per turn.
///
/// Concurrent 401s carrying the same stale token share one refresh. Returns
/// `DoNotRetry` when the turn has no refreshable credential.
pub fn refresh_on_unauthorized_hook() -> UnauthorizedHook {
    Arc::new(|event| Box::pin(refresh_rejected_token(event)))
}

async fn attach_bearer(mut request: PreparedRequest, ctx: TurnContext) -> Result<PreparedRequest> {
    if let Some(auth) = ctx.auth() {
        let token = auth.current_token().await;
        request.set_header("authorization", format!("Bearer {}", token));
    }
    Ok(request)
}

async fn refresh_rejected_token(event: UnauthorizedEvent) -> Result<RetryDecision> {
    let Some(auth) = event.context.auth().filter(|auth| auth.can_refresh()) else {
        log::debug!("401 received without a refreshable credential");
        return Ok(RetryDecision::DoNotRetry);
    };

    let rejected = event
        .request
        .bearer_token()
        .map(str::to_owned)
        .or_else(|| event.token.clone());
    let Some(rejected) = rejected else {
        log::debug!("401 received without a record of the presented token");
        return Ok(RetryDecision::DoNotRetry);
    };
    auth.refresh(&rejected).await?;
    Ok(RetryDecision::Retry)
}
