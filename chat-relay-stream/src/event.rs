//! Events produced by a coalesced stream and their wire framing
//!
//! Each event is sent as one `data: <payload>\n\n` frame. Sentinel texts only
//! exist at this boundary; everything upstream works with the tagged enum.

use chat_relay_providers::SourceError;
use thiserror::Error;

pub const NO_CONTENT_NOTICE: &str = "[No content received from model]";
pub const DONE_MARKER: &str = "[DONE]";

/// Why a stream ended early
#[derive(Error, Debug)]
pub enum StreamFailure {
    /// The chunk source could not be opened or broke mid-stream
    #[error("{0}")]
    SourceUnavailable(#[from] SourceError),
}

impl StreamFailure {
    /// Whether the source gave up waiting on the backend
    pub fn is_timeout(&self) -> bool {
        match self {
            StreamFailure::SourceUnavailable(err) => err.is_timeout(),
        }
    }
}

/// One emission of a coalesced stream
#[derive(Debug)]
pub enum StreamEvent {
    /// A flushed piece of the reply
    Content(String),
    /// The source completed without producing any text
    NoContent,
    /// The source failed; the stream stops after the terminal marker
    Failed(StreamFailure),
    /// Terminal marker, always the last event
    Done,
}

impl StreamEvent {
    /// The payload carried after `data: `
    pub fn data(&self) -> String {
        match self {
            StreamEvent::Content(text) => response_json(text),
            StreamEvent::NoContent => response_json(NO_CONTENT_NOTICE),
            StreamEvent::Failed(failure) => response_json(&format!("[Error]: {}", failure)),
            StreamEvent::Done => DONE_MARKER.to_string(),
        }
    }

    /// The complete wire frame for this event
    pub fn to_sse_frame(&self) -> String {
        format!("data: {}\n\n", self.data())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done)
    }

    /// Reply text carried by a content event
    pub fn content(&self) -> Option<&str> {
        match self {
            StreamEvent::Content(text) => Some(text),
            _ => None,
        }
    }
}

/// `{"response": <text>}`, spaced after the colon
fn response_json(text: &str) -> String {
    format!("{{\"response\": {}}}", serde_json::Value::from(text))
}
