//! Transcript entries and segments
//!
//! A [`Transcript`] is the append-only log of a session. Every turn appends a
//! [`Entry::Prompt`] followed by whatever the provider emitted: response
//! entries made of ordered [`Segment`]s, and tool call/output entries that this
//! crate passes through without interpreting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of emitted content within one response entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { content: String },
    Structured { content: Value },
}

impl Segment {
    pub fn text(content: impl Into<String>) -> Self {
        Segment::Text {
            content: content.into(),
        }
    }

    pub fn structured(content: Value) -> Self {
        Segment::Structured { content }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text { content } => Some(content),
            Segment::Structured { .. } => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Segment::Structured { content } => Some(content),
            Segment::Text { .. } => None,
        }
    }
}

/// Tool invocation requested by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Output produced for a previous [`ToolCall`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub id: String,
    pub name: String,
    pub output: Value,
}

impl ToolOutput {
    pub fn new(id: impl Into<String>, name: impl Into<String>, output: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            output,
        }
    }
}

/// One immutable record in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    Prompt { text: String },
    Response { segments: Vec<Segment> },
    ToolCall(ToolCall),
    ToolOutput(ToolOutput),
}

impl Entry {
    pub fn prompt(text: impl Into<String>) -> Self {
        Entry::Prompt { text: text.into() }
    }

    pub fn response(segments: Vec<Segment>) -> Self {
        Entry::Response { segments }
    }

    /// Response entry holding a single text segment
    pub fn text_response(content: impl Into<String>) -> Self {
        Entry::Response {
            segments: vec![Segment::text(content)],
        }
    }

    /// Response entry holding a single structured segment
    pub fn structured_response(content: Value) -> Self {
        Entry::Response {
            segments: vec![Segment::structured(content)],
        }
    }

    /// Segments of a response entry; empty for every other kind
    pub fn segments(&self) -> &[Segment] {
        match self {
            Entry::Response { segments } => segments,
            _ => &[],
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Entry::Response { .. })
    }
}

/// Append-only ordered log of entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<Entry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one whole entry
    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Entries appended at or after `start`
    pub fn since(&self, start: usize) -> &[Entry] {
        &self.entries[start.min(self.entries.len())..]
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<Entry> for Transcript {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
