//! Server-Sent Events adapter producing an [`EventStream`]
//!
//! Some deployments put a thin relay in front of the model that already speaks
//! this crate's [`Event`] shape. Each SSE frame carries one JSON event:
//!
//! ```text
//! data: {"event":"transcript","data":{"type":"response","segments":[{"type":"text","content":"Hi"}]}}
//!
//! data: {"event":"usage","data":{"output_tokens":2}}
//!
//! data: [DONE]
//! ```
//!
//! [`EventSourceProvider`] opens that stream through a [`Transport`], so the
//! bearer hooks and the single 401 retry apply to the initial request.

use crate::event::{Event, EventStream, GenerationProvider, GenerationRequest, ResponseMode};
use crate::transcript::Entry;
use crate::transport::{ApiRequest, Transport};
use crate::{Error, Result};
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::future;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;

/// End-of-stream sentinel frame
const DONE: &str = "[DONE]";

/// Decode an SSE HTTP response into events
pub fn decode_event_stream(response: reqwest::Response) -> EventStream {
    decode_bytes(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::RequestFailed)),
    )
}

fn decode_bytes<S, B>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let frames = bytes
        .eventsource()
        .take_while(|frame| {
            let done = matches!(frame, Ok(frame) if frame.data.trim() == DONE);
            future::ready(!done)
        })
        .filter_map(|frame| async move {
            match frame {
                Ok(frame) if frame.data.trim().is_empty() => None,
                Ok(frame) => Some(
                    serde_json::from_str::<Event>(&frame.data)
                        .map_err(|e| Error::decoding(e, frame.data.clone())),
                ),
                Err(EventStreamError::Transport(e)) => Some(Err(e)),
                Err(EventStreamError::Utf8(e)) => Some(Err(Error::invalid_response(format!(
                    "event stream is not valid UTF-8: {}",
                    e
                )))),
                Err(EventStreamError::Parser(e)) => Some(Err(Error::invalid_response(format!(
                    "malformed event stream: {:?}",
                    e
                )))),
            }
        });

    Box::pin(frames)
}

#[derive(Serialize)]
struct StreamRequestBody<'a> {
    transcript: &'a [Entry],
    mode: &'a ResponseMode,
}

/// Provider that POSTs the transcript and reads back an SSE event stream
#[derive(Debug, Clone)]
pub struct EventSourceProvider {
    transport: Transport,
    path: String,
}

impl EventSourceProvider {
    pub fn new(transport: Transport, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

#[async_trait]
impl GenerationProvider for EventSourceProvider {
    async fn stream_response(&self, request: GenerationRequest) -> Result<EventStream> {
        let body = StreamRequestBody {
            transcript: &request.transcript,
            mode: &request.mode,
        };
        let api_request = ApiRequest::post(self.path.as_str())
            .header("accept", "text/event-stream")
            .json(&body)?;

        let response = self
            .transport
            .open_stream(api_request, &request.context)
            .await?;
        Ok(decode_event_stream(response))
    }
}
