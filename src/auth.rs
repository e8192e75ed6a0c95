//! Per-turn bearer credentials with debounced refresh
//!
//! An [`AuthorizationContext`] is created when a turn starts and dropped when
//! it ends. All requests issued during that turn share it through
//! [`TurnContext`](crate::TurnContext), so when several of them are rejected
//! with the same stale token only one refresh runs and the rest reuse its
//! result.
//!
//! ```rust,no_run
//! use agent_turn::{Authorization, AuthorizationContext};
//!
//! # async fn example() -> agent_turn::Result<()> {
//! let auth = Authorization::refreshable("expired", || async {
//!     // Exchange a refresh token here
//!     Ok("fresh".to_string())
//! });
//!
//! let ctx = AuthorizationContext::from(&auth);
//! let rejected = ctx.current_token().await;
//! let token = ctx.refresh(&rejected).await?;
//! assert_eq!(token, "fresh");
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

/// Async operation returning a new bearer token
pub type RefreshOperation =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<String>> + Send>> + Send + Sync>;

/// How a session authenticates, as supplied by the caller
#[derive(Clone)]
pub enum Authorization {
    /// A fixed token with no way to renew it
    Static(String),
    /// A token plus the operation that renews it
    Refreshable {
        token: String,
        refresh: RefreshOperation,
    },
}

impl Authorization {
    pub fn bearer(token: impl Into<String>) -> Self {
        Authorization::Static(token.into())
    }

    pub fn refreshable<F, Fut>(token: impl Into<String>, refresh: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Authorization::Refreshable {
            token: token.into(),
            refresh: Arc::new(move || Box::pin(refresh())),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Authorization::Static(token) | Authorization::Refreshable { token, .. } => token,
        }
    }

    pub fn can_refresh(&self) -> bool {
        matches!(self, Authorization::Refreshable { .. })
    }

    /// Replace the token, keeping the refresh operation
    pub(crate) fn set_token(&mut self, new_token: String) {
        match self {
            Authorization::Static(token) | Authorization::Refreshable { token, .. } => {
                *token = new_token
            }
        }
    }
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authorization::Static(_) => f.debug_tuple("Static").field(&"***").finish(),
            Authorization::Refreshable { .. } => f
                .debug_struct("Refreshable")
                .field("token", &"***")
                .field("refresh", &"<fn>")
                .finish(),
        }
    }
}

struct Inner {
    token: RwLock<String>,
    refresh: Option<RefreshOperation>,
    refresh_gate: Mutex<RefreshOutcome>,
    /// Completed refresh attempts, successful or not
    generation: AtomicU64,
    refreshes: AtomicUsize,
}

/// Result of the most recent refresh attempt, shared with callers that
/// waited on it
#[derive(Default)]
struct RefreshOutcome {
    failure: Option<String>,
}

/// Bearer token holder shared by every request of one turn.
///
/// Clones share state. Reads are concurrent, writes are exclusive, and at
/// most one refresh operation runs at a time.
#[derive(Clone)]
pub struct AuthorizationContext {
    inner: Arc<Inner>,
}

impl AuthorizationContext {
    pub fn new(token: impl Into<String>, refresh: Option<RefreshOperation>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: RwLock::new(token.into()),
                refresh,
                refresh_gate: Mutex::new(RefreshOutcome::default()),
                generation: AtomicU64::new(0),
                refreshes: AtomicUsize::new(0),
            }),
        }
    }

    /// Context with a token that cannot be refreshed
    pub fn with_static_token(token: impl Into<String>) -> Self {
        Self::new(token, None)
    }

    pub async fn current_token(&self) -> String {
        self.inner.token.read().await.clone()
    }

    pub async fn set_token(&self, token: impl Into<String>) {
        *self.inner.token.write().await = token.into();
    }

    pub fn can_refresh(&self) -> bool {
        self.inner.refresh.is_some()
    }

    /// Number of refresh operations that succeeded
    pub fn refresh_count(&self) -> usize {
        self.inner.refreshes.load(Ordering::SeqCst)
    }

    /// Obtain a token to replace `rejected`.
    ///
    /// Calls are serialized. A call that waited while another refresh ran
    /// takes that refresh's outcome, token or error, without running the
    /// operation again. Otherwise, if the current token no longer equals
    /// `rejected`, an earlier refresh already replaced it and that token is
    /// returned.
    pub async fn refresh(&self, rejected: &str) -> Result<String> {
        let Some(refresh) = self.inner.refresh.as_ref() else {
            return Err(Error::authorization("no refresh operation configured"));
        };

        let observed = self.inner.generation.load(Ordering::SeqCst);
        let mut outcome = self.inner.refresh_gate.lock().await;

        if self.inner.generation.load(Ordering::SeqCst) != observed {
            log::debug!("reusing the outcome of a concurrent token refresh");
            return match &outcome.failure {
                Some(message) => Err(Error::authorization(message.clone())),
                None => Ok(self.current_token().await),
            };
        }

        let current = self.current_token().await;
        if current != rejected {
            log::debug!("bearer token already refreshed");
            return Ok(current);
        }

        log::debug!("refreshing bearer token");
        let result = refresh().await;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(token) => {
                self.set_token(token.clone()).await;
                self.inner.refreshes.fetch_add(1, Ordering::SeqCst);
                outcome.failure = None;
                Ok(token)
            }
            Err(e) => {
                let message = match e {
                    Error::Authorization(message) => message,
                    other => format!("token refresh failed: {}", other),
                };
                outcome.failure = Some(message.clone());
                Err(Error::Authorization(message))
            }
        }
    }
}

impl From<&Authorization> for AuthorizationContext {
    fn from(auth: &Authorization) -> Self {
        match auth {
            Authorization::Static(token) => Self::with_static_token(token.clone()),
            Authorization::Refreshable { token, refresh } => {
                Self::new(token.clone(), Some(refresh.clone()))
            }
        }
    }
}

impl std::fmt::Debug for AuthorizationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationContext")
            .field("token", &"***")
            .field("can_refresh", &self.can_refresh())
            .field("refresh_count", &self.refresh_count())
            .finish()
    }
}
