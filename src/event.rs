//! The event stream contract between providers and the assembler
//!
//! Anything that produces a model turn (an HTTP adapter, the simulation
//! harness, a test fixture) hands the assembler an [`EventStream`]: an ordered
//! async sequence of [`Event`]s. Transcript events arrive in emission order
//! and are appended in that order. Usage events can appear anywhere and are
//! merged independently.

use crate::context::TurnContext;
use crate::transcript::Entry;
use crate::usage::TokenUsage;
use crate::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// One item of a provider's output for a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    Transcript(Entry),
    Usage(TokenUsage),
}

impl Event {
    pub fn entry(entry: Entry) -> Self {
        Event::Transcript(entry)
    }

    pub fn usage(usage: TokenUsage) -> Self {
        Event::Usage(usage)
    }
}

/// A pinned, boxed stream of events for one turn.
///
/// Dropping the stream abandons the turn and releases whatever the producer
/// holds (an HTTP body, a script cursor).
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// What kind of final content the caller expects from the turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Text,
    Structured {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
    },
}

impl ResponseMode {
    pub fn structured() -> Self {
        ResponseMode::Structured { schema: None }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, ResponseMode::Structured { .. })
    }
}

/// Everything a provider needs to start producing a turn
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Transcript as of the start of the turn, prompt included
    pub transcript: Vec<Entry>,
    pub mode: ResponseMode,
    pub context: TurnContext,
}

/// Source of event streams.
///
/// Implemented by real provider adapters and by
/// [`SimulatedProvider`](crate::SimulatedProvider).
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn stream_response(&self, request: GenerationRequest) -> Result<EventStream>;
}

#[async_trait]
impl<P: GenerationProvider + ?Sized> GenerationProvider for std::sync::Arc<P> {
    async fn stream_response(&self, request: GenerationRequest) -> Result<EventStream> {
        (**self).stream_response(request).await
    }
}
