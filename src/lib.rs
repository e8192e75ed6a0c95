//! # agent-turn
//!
//! A provider-agnostic core for running conversational model turns.
//!
//! ## Overview
//!
//! A turn takes a prompt plus the conversation so far, asks a provider for an
//! [`EventStream`], and folds that stream into the transcript:
//!
//! - **Transcript**: ordered record of prompts, responses, tool calls and tool outputs
//! - **Event stream**: the one contract every provider implements, real or simulated
//! - **Turn assembly**: text or structured final content, with token usage summed along the way
//! - **Transport**: JSON over HTTP with request preparation hooks and a single retry after a 401
//! - **Authorization**: per-turn bearer state where concurrent 401s trigger exactly one refresh
//! - **Simulation**: scripted providers for deterministic tests
//!
//! ## Text turns
//!
//! ```rust
//! use agent_turn::{Session, SimulatedGeneration, SimulatedProvider};
//!
//! # async fn example() -> agent_turn::Result<()> {
//! let provider = SimulatedProvider::<()>::new(vec![
//!     SimulatedGeneration::respond_with_text("Paris"),
//!     SimulatedGeneration::respond_with_text("About two million"),
//! ]);
//! let mut session = Session::new(provider);
//!
//! let first = session.respond("What's the capital of France?").await?;
//! assert_eq!(first.content, "Paris");
//!
//! // The second turn sees the whole transcript
//! let second = session.respond("How many people live there?").await?;
//! assert_eq!(second.added_entries.len(), 2);
//! assert_eq!(session.transcript().len(), 4);
//! # Ok(())
//! # }
//! ```
//!
//! ## Structured turns over HTTP
//!
//! ```rust,no_run
//! use agent_turn::{
//!     Authorization, EventSourceProvider, Session, Transport, TransportConfig,
//! };
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Forecast {
//!     summary: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransportConfig::builder()
//!         .base_url("http://localhost:8080/v1")
//!         .timeout(120)
//!         .build()?;
//!     let transport = Transport::new(config)?.with_bearer_auth();
//!
//!     let provider = EventSourceProvider::new(transport, "turns");
//!     let mut session = Session::new(provider)
//!         .with_authorization(Authorization::bearer("sk-local"));
//!
//!     let forecast = session
//!         .respond_structured::<Forecast>("Summarize tomorrow's weather")
//!         .await?;
//!     println!("{}", forecast.content.summary);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **transcript**: entries, segments and the ordered transcript
//! - **event**: the event stream contract and the provider trait
//! - **usage**: token counters and their merge rules
//! - **assembler**: folds one turn's stream into the transcript
//! - **session**: multi-turn driver owning the transcript
//! - **simulation**: scripted provider for tests
//! - **transport**: request building, dispatch and the 401 retry
//! - **hooks**: request preparation and unauthorized handling
//! - **auth**: bearer credentials with debounced refresh
//! - **context**: per-turn context passed through the call chain
//! - **sse**: Server-Sent Events adapter
//! - **config**: transport configuration with environment fallbacks
//! - **error**: the crate's error type

mod assembler;
mod auth;
mod config;
mod context;
mod error;
mod event;
mod hooks;
mod session;
mod simulation;
mod sse;
mod transcript;
mod transport;
mod usage;

// --- Turns ---

pub use assembler::{Response, TurnAssembler};
pub use session::Session;

// --- Transcript and events ---

pub use event::{Event, EventStream, GenerationProvider, GenerationRequest, ResponseMode};
pub use transcript::{Entry, Segment, ToolCall, ToolOutput, Transcript};
pub use usage::TokenUsage;

// --- Providers ---

pub use simulation::{SimulatedGeneration, SimulatedProvider};
pub use sse::{EventSourceProvider, decode_event_stream};

// --- Transport ---

pub use config::{BASE_URL_ENV, TIMEOUT_ENV, TransportConfig, TransportConfigBuilder};
pub use transport::{ApiRequest, PreparedRequest, Transport};

// --- Hooks and authorization ---

pub use auth::{Authorization, AuthorizationContext, RefreshOperation};
pub use context::TurnContext;
pub use hooks::{
    PrepareRequestHook, RetryDecision, TransportHooks, UnauthorizedEvent, UnauthorizedHook,
    bearer_prepare_hook, refresh_on_unauthorized_hook,
};

// --- Error Handling ---

pub use error::{Error, Result};

/// The types most turn-running code needs.
///
/// ```rust
/// use agent_turn::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Authorization, Entry, Error, Event, EventStream, GenerationProvider, GenerationRequest,
        Response, ResponseMode, Result, Session, SimulatedGeneration, SimulatedProvider,
        TokenUsage, Transcript, Transport, TransportConfig, TurnContext,
    };
}
