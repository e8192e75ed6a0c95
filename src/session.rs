//! Multi-turn sessions over any generation provider
//!
//! A [`Session`] owns the transcript and a [`GenerationProvider`]. Every call
//! to [`respond`](Session::respond) or
//! [`respond_structured`](Session::respond_structured) is one turn:
//!
//! ```text
//! respond(prompt)
//!     │
//!     ├─> fresh TurnContext (new AuthorizationContext from the session's Authorization)
//!     │
//!     ├─> Prompt entry appended to the transcript
//!     │
//!     ├─> provider.stream_response(transcript, mode, context)
//!     │
//!     ├─> TurnAssembler drains the stream into the transcript
//!     │
//!     └─> refreshed token carried back for the next turn
//! ```
//!
//! The same session type runs against the network ([`EventSourceProvider`](crate::EventSourceProvider))
//! or a script ([`SimulatedProvider`](crate::SimulatedProvider)).
//!
//! # Cancellation
//!
//! [`cancellation_token`](Session::cancellation_token) returns a handle that
//! can stop the current turn from another task. The turn then fails with
//! [`Error::Cancelled`](crate::Error::Cancelled) and the transcript keeps the
//! entries appended so far. Cancelling before a turn starts cancels that turn.
//! Once a cancelled turn returns the session switches to a new token, so take
//! a new handle after a cancellation.
//!
//! ```rust,no_run
//! # use agent_turn::{Session, SimulatedProvider, SimulatedGeneration};
//! # async fn example() -> agent_turn::Result<()> {
//! # let provider = SimulatedProvider::<()>::new(vec![SimulatedGeneration::respond_with_text("ok")]);
//! let mut session = Session::new(provider);
//! let handle = session.cancellation_token();
//!
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     handle.cancel();
//! });
//!
//! let response = session.respond("Summarize the report").await?;
//! # Ok(())
//! # }
//! ```

use crate::assembler::{Response, TurnAssembler};
use crate::auth::Authorization;
use crate::context::TurnContext;
use crate::event::{EventStream, GenerationProvider, GenerationRequest, ResponseMode};
use crate::transcript::Transcript;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Stateful conversation driver
pub struct Session<P> {
    provider: P,
    transcript: Transcript,
    authorization: Option<Authorization>,
    cancel: CancellationToken,
}

impl<P: GenerationProvider> Session<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            transcript: Transcript::new(),
            authorization: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Continue from an existing transcript
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn with_authorization(mut self, authorization: Authorization) -> Self {
        self.authorization = Some(authorization);
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn into_transcript(self) -> Transcript {
        self.transcript
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn authorization(&self) -> Option<&Authorization> {
        self.authorization.as_ref()
    }

    /// Handle that cancels the current or next turn
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a text-mode turn
    pub async fn respond(&mut self, prompt: &str) -> Result<Response<String>> {
        let ctx = self.begin_turn();

        let result = {
            let assembler = TurnAssembler::begin(&mut self.transcript, prompt)
                .with_cancellation(self.cancel.clone());
            let request = GenerationRequest {
                transcript: assembler.transcript().entries().to_vec(),
                mode: ResponseMode::Text,
                context: ctx.clone(),
            };

            match open_events(&self.provider, request, &self.cancel).await {
                Ok(events) => assembler.text(events).await,
                Err(e) => Err(e),
            }
        };

        self.end_turn(&ctx).await;
        result
    }

    /// Run a structured-mode turn and decode the payload as `T`
    pub async fn respond_structured<T: DeserializeOwned>(
        &mut self,
        prompt: &str,
    ) -> Result<Response<T>> {
        self.run_structured(prompt, None).await
    }

    /// Structured turn with a JSON Schema forwarded to the provider
    pub async fn respond_structured_with_schema<T: DeserializeOwned>(
        &mut self,
        prompt: &str,
        schema: Value,
    ) -> Result<Response<T>> {
        self.run_structured(prompt, Some(schema)).await
    }

    async fn run_structured<T: DeserializeOwned>(
        &mut self,
        prompt: &str,
        schema: Option<Value>,
    ) -> Result<Response<T>> {
        let ctx = self.begin_turn();

        let result = {
            let assembler = TurnAssembler::begin(&mut self.transcript, prompt)
                .with_cancellation(self.cancel.clone());
            let request = GenerationRequest {
                transcript: assembler.transcript().entries().to_vec(),
                mode: ResponseMode::Structured { schema },
                context: ctx.clone(),
            };

            match open_events(&self.provider, request, &self.cancel).await {
                Ok(events) => assembler.structured::<T>(events).await,
                Err(e) => Err(e),
            }
        };

        self.end_turn(&ctx).await;
        result
    }

    fn begin_turn(&self) -> TurnContext {
        TurnContext::for_authorization(self.authorization.as_ref())
    }

    /// Swap out a cancelled token and keep any refreshed bearer token
    async fn end_turn(&mut self, ctx: &TurnContext) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        if let (Some(authorization), Some(auth)) = (self.authorization.as_mut(), ctx.auth()) {
            if auth.refresh_count() > 0 {
                authorization.set_token(auth.current_token().await);
            }
        }
    }
}

/// Ask the provider for a stream, giving up as soon as `cancel` fires
async fn open_events<P: GenerationProvider>(
    provider: &P,
    request: GenerationRequest,
    cancel: &CancellationToken,
) -> Result<EventStream> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            log::debug!("turn cancelled while opening the event stream");
            Err(Error::Cancelled)
        }
        opened = provider.stream_response(request) => opened,
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("provider", &self.provider)
            .field("transcript", &format!("{} entries", self.transcript.len()))
            .field("authorization", &self.authorization)
            .finish()
    }
}
