//! Deterministic simulation harness
//!
//! [`SimulatedProvider`] replays a script of [`SimulatedGeneration`]s as an
//! [`EventStream`], so sessions and assemblers can be exercised without a
//! network. It runs through exactly the same assembly path as a real provider.
//!
//! # Steps
//!
//! Each pull past the previous step's events consumes one script item:
//!
//! - `Text(s)` emits a response entry with one text segment and ends the turn.
//! - `Structured(v)` emits a response entry with one structured segment
//!   holding `v` encoded as JSON and ends the turn.
//! - `ToolCall { .. }` emits a tool call entry followed by its tool output
//!   entry and moves on to the next step within the same turn. No tool runs.
//!
//! Script position is shared by clones and persists across turns, so one
//! script can drive a whole multi-turn conversation. Running off the end of
//! the script yields [`Error::ScriptExhausted`] as a stream item.
//!
//! ```rust
//! use agent_turn::{Session, SimulatedGeneration, SimulatedProvider};
//!
//! # async fn example() -> agent_turn::Result<()> {
//! let provider = SimulatedProvider::<()>::new(vec![SimulatedGeneration::respond_with_text("Hello")]);
//! let mut session = Session::new(provider);
//!
//! let response = session.respond("Hi").await?;
//! assert_eq!(response.content, "Hello");
//! # Ok(())
//! # }
//! ```

use crate::event::{Event, EventStream, GenerationProvider, GenerationRequest};
use crate::transcript::{Entry, ToolCall, ToolOutput};
use crate::usage::TokenUsage;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One scripted outcome
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedGeneration<T> {
    Text(String),
    Structured(T),
    ToolCall {
        name: String,
        arguments: Value,
        output: Value,
    },
}

impl<T> SimulatedGeneration<T> {
    pub fn respond_with_text(text: impl Into<String>) -> Self {
        SimulatedGeneration::Text(text.into())
    }

    pub fn respond_with_structured(value: T) -> Self {
        SimulatedGeneration::Structured(value)
    }

    /// A tool round trip with mock arguments and output
    pub fn tool_call(name: impl Into<String>, arguments: Value, output: Value) -> Self {
        SimulatedGeneration::ToolCall {
            name: name.into(),
            arguments,
            output,
        }
    }
}

/// Replays a script through the event stream contract
pub struct SimulatedProvider<T> {
    script: Arc<Vec<SimulatedGeneration<T>>>,
    cursor: Arc<Mutex<usize>>,
    step_usage: Option<TokenUsage>,
    recorded_requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl<T> SimulatedProvider<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub fn new(script: Vec<SimulatedGeneration<T>>) -> Self {
        Self {
            script: Arc::new(script),
            cursor: Arc::new(Mutex::new(0)),
            step_usage: None,
            recorded_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Emit a usage event at the start of every step
    pub fn with_step_usage(mut self, usage: TokenUsage) -> Self {
        self.step_usage = Some(usage);
        self
    }

    /// Number of script items consumed so far
    pub fn consumed(&self) -> usize {
        *lock(&self.cursor)
    }

    pub fn remaining(&self) -> usize {
        self.script.len().saturating_sub(self.consumed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Number of turns requested from this provider
    pub fn call_count(&self) -> usize {
        lock(&self.recorded_requests).len()
    }

    pub fn recorded_requests(&self) -> Vec<GenerationRequest> {
        lock(&self.recorded_requests).clone()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        lock(&self.recorded_requests).last().cloned()
    }

    /// Build the lazy event stream for one turn
    pub fn event_stream(&self) -> EventStream {
        let state = Replay {
            script: self.script.clone(),
            cursor: self.cursor.clone(),
            step_usage: self.step_usage,
            pending: VecDeque::new(),
            finished: false,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            let item = state.next_item()?;
            Some((item, state))
        }))
    }
}

impl<T> Clone for SimulatedProvider<T> {
    fn clone(&self) -> Self {
        Self {
            script: self.script.clone(),
            cursor: self.cursor.clone(),
            step_usage: self.step_usage,
            recorded_requests: self.recorded_requests.clone(),
        }
    }
}

impl<T> std::fmt::Debug for SimulatedProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedProvider")
            .field("script_len", &self.script.len())
            .field("consumed", &*lock(&self.cursor))
            .field("step_usage", &self.step_usage)
            .finish()
    }
}

#[async_trait]
impl<T> GenerationProvider for SimulatedProvider<T>
where
    T: Serialize + Send + Sync + 'static,
{
    async fn stream_response(&self, request: GenerationRequest) -> Result<EventStream> {
        lock(&self.recorded_requests).push(request);
        Ok(self.event_stream())
    }
}

/// Per-turn replay state
struct Replay<T> {
    script: Arc<Vec<SimulatedGeneration<T>>>,
    cursor: Arc<Mutex<usize>>,
    step_usage: Option<TokenUsage>,
    pending: VecDeque<Event>,
    finished: bool,
}

impl<T: Serialize> Replay<T> {
    /// Next stream item, or `None` once the turn is over
    fn next_item(&mut self) -> Option<Result<Event>> {
        if let Some(event) = self.pending.pop_front() {
            return Some(Ok(event));
        }
        if self.finished {
            return None;
        }

        match self.take_step() {
            Ok(()) => self.pending.pop_front().map(Ok),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    /// Consume one script item and queue its events
    fn take_step(&mut self) -> Result<()> {
        let step = {
            let mut cursor = lock(&self.cursor);
            let step = *cursor;
            if step >= self.script.len() {
                log::debug!("simulation script exhausted at step {}", step);
                return Err(Error::ScriptExhausted { step });
            }
            *cursor += 1;
            step
        };

        if let Some(usage) = self.step_usage {
            self.pending.push_back(Event::Usage(usage));
        }

        match &self.script[step] {
            SimulatedGeneration::Text(text) => {
                self.pending
                    .push_back(Event::Transcript(Entry::text_response(text.clone())));
                self.finished = true;
            }
            SimulatedGeneration::Structured(value) => {
                let content = serde_json::to_value(value)?;
                self.pending
                    .push_back(Event::Transcript(Entry::structured_response(content)));
                self.finished = true;
            }
            SimulatedGeneration::ToolCall {
                name,
                arguments,
                output,
            } => {
                let id = format!("call_{}", step);
                self.pending.push_back(Event::Transcript(Entry::ToolCall(ToolCall::new(
                    id.clone(),
                    name.clone(),
                    arguments.clone(),
                ))));
                self.pending.push_back(Event::Transcript(Entry::ToolOutput(
                    ToolOutput::new(id, name.clone(), output.clone()),
                )));
            }
        }

        log::trace!("simulation consumed step {}", step);
        Ok(())
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
