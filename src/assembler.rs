//! Turning an event stream into a finished response
//!
//! A [`TurnAssembler`] owns the transcript for the length of one turn. It
//! records the prompt first, then drains the provider's [`EventStream`] in
//! order, appending each transcript entry as it arrives and merging usage
//! reports into a running total.
//!
//! Two drain modes exist:
//!
//! - **text**: drain to the end, then join every text segment of every
//!   response entry with `"\n"`. Structured segments are ignored.
//! - **structured**: stop at the first structured segment of a response
//!   entry and decode it. Anything the provider would have emitted after it
//!   is never pulled. Reaching the end without one is
//!   [`Error::UnexpectedStructuredResponse`].
//!
//! Entries are appended whole, one `push` per entry, so a turn that fails or
//! is cancelled leaves the transcript with every entry observed up to that
//! point and nothing half-written.
//!
//! ```rust
//! use agent_turn::{Entry, Event, EventStream, Transcript, TurnAssembler};
//! use futures::stream;
//!
//! # async fn example() -> agent_turn::Result<()> {
//! let mut transcript = Transcript::new();
//! let events: EventStream = Box::pin(stream::iter(vec![Ok(Event::entry(
//!     Entry::text_response("Hello"),
//! ))]));
//!
//! let response = TurnAssembler::begin(&mut transcript, "Hi").text(events).await?;
//! assert_eq!(response.content, "Hello");
//! assert_eq!(transcript.len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::event::{Event, EventStream};
use crate::transcript::{Entry, Segment, Transcript};
use crate::usage::TokenUsage;
use crate::{Error, Result};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// The result of one successful turn
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub content: T,
    /// Entries appended during this turn, prompt first
    pub added_entries: Vec<Entry>,
    /// Merged usage, `None` when the provider reported none
    pub token_usage: Option<TokenUsage>,
}

/// Drains one event stream into the transcript
pub struct TurnAssembler<'t> {
    transcript: &'t mut Transcript,
    added_entries: Vec<Entry>,
    token_usage: Option<TokenUsage>,
    cancel: CancellationToken,
}

impl<'t> TurnAssembler<'t> {
    /// Start a turn by appending the prompt entry
    pub fn begin(transcript: &'t mut Transcript, prompt: impl Into<String>) -> Self {
        let mut assembler = Self {
            transcript,
            added_entries: Vec::new(),
            token_usage: None,
            cancel: CancellationToken::new(),
        };
        assembler.record(Entry::prompt(prompt));
        assembler
    }

    /// Stop draining with [`Error::Cancelled`] once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn transcript(&self) -> &Transcript {
        self.transcript
    }

    pub fn added_entries(&self) -> &[Entry] {
        &self.added_entries
    }

    /// Drain to completion and return the newline-joined text
    pub async fn text(mut self, mut events: EventStream) -> Result<Response<String>> {
        let mut texts: Vec<String> = Vec::new();

        while let Some(event) = self.next_event(&mut events).await? {
            match event {
                Event::Usage(usage) => self.merge_usage(usage),
                Event::Transcript(entry) => {
                    texts.extend(
                        entry
                            .segments()
                            .iter()
                            .filter_map(Segment::as_text)
                            .map(str::to_owned),
                    );
                    self.record(entry);
                }
            }
        }

        Ok(self.finish(texts.join("\n")))
    }

    /// Drain until the first structured segment and decode it as `T`
    pub async fn structured<T: DeserializeOwned>(
        mut self,
        mut events: EventStream,
    ) -> Result<Response<T>> {
        while let Some(event) = self.next_event(&mut events).await? {
            match event {
                Event::Usage(usage) => self.merge_usage(usage),
                Event::Transcript(entry) => {
                    let payload = entry
                        .segments()
                        .iter()
                        .find_map(Segment::as_structured)
                        .cloned();
                    self.record(entry);

                    if let Some(payload) = payload {
                        let content = serde_json::from_value::<T>(payload.clone())
                            .map_err(|e| Error::decoding(e, payload.to_string()))?;
                        return Ok(self.finish(content));
                    }
                }
            }
        }

        log::debug!(
            "stream ended after {} entries without a structured segment",
            self.added_entries.len()
        );
        Err(Error::UnexpectedStructuredResponse)
    }

    async fn next_event(&self, events: &mut EventStream) -> Result<Option<Event>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                log::debug!("turn cancelled after {} entries", self.added_entries.len());
                Err(Error::Cancelled)
            }
            next = events.next() => next.transpose(),
        }
    }

    fn record(&mut self, entry: Entry) {
        self.transcript.push(entry.clone());
        self.added_entries.push(entry);
    }

    fn merge_usage(&mut self, usage: TokenUsage) {
        self.token_usage = TokenUsage::merge_optional(self.token_usage, Some(usage));
    }

    fn finish<T>(self, content: T) -> Response<T> {
        log::debug!(
            "turn finished: {} entries added, usage {:?}",
            self.added_entries.len(),
            self.token_usage
        );
        Response {
            content,
            added_entries: self.added_entries,
            token_usage: self.token_usage,
        }
    }
}
