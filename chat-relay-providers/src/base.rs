//! Base trait for chunk sources

use async_trait::async_trait;
use chat_relay_core::session::{Role, Turn};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// Error type for chunk source operations.
///
/// Every variant means the source is unavailable for the current stream.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl SourceError {
    /// Whether the failure came from a connection or read timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            SourceError::Timeout(_) => true,
            SourceError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// One element produced by a chunk source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Incremental generated text
    Text(String),
    /// The backend finished generating
    End,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Fragment::Text(text.into())
    }
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = SourceResult<Fragment>> + Send>>;

/// A message in the request context sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: String,
    pub content: String,
}

impl ContextMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User.as_str(), content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant.as_str(), content)
    }
}

impl From<&Turn> for ContextMessage {
    fn from(turn: &Turn) -> Self {
        Self::new(turn.role.as_str(), turn.content.clone())
    }
}

/// Producer of incremental text fragments for one request.
///
/// `open` may fail before anything is produced; the returned stream may also
/// yield an error at any point. Dropping the stream releases the underlying
/// connection.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Start generating a reply for the given context
    async fn open(&self, context: Vec<ContextMessage>) -> SourceResult<FragmentStream>;

    /// Model the source generates with
    fn model(&self) -> &str;
}
