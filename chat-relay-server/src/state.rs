use chat_relay_core::config::Config;
use chat_relay_core::session::SessionStore;
use chat_relay_providers::{build_source, ChunkSource};
use chat_relay_stream::{FlushPolicy, StreamCoalescer};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Shared handles every request works against
#[derive(Clone)]
pub struct AppState {
    pub coalescer: StreamCoalescer,
}

impl AppState {
    pub fn new(coalescer: StreamCoalescer) -> Self {
        Self { coalescer }
    }

    /// Wire up the configured chunk source, session store and flush policy
    pub fn from_config(config: &Config) -> Self {
        Self::with_source(config, build_source(&config.provider))
    }

    pub fn with_source(config: &Config, source: Arc<dyn ChunkSource>) -> Self {
        let sessions = Arc::new(SessionStore::new(config.stream.max_turns));
        let policy = FlushPolicy::new(Duration::from_millis(config.stream.flush_interval_ms));
        let coalescer = StreamCoalescer::new(source, sessions)
            .with_policy(policy)
            .with_system_prompt(config.provider.system_prompt.clone());
        Self::new(coalescer)
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.coalescer.sessions()
    }
}

/// Query string of `GET /chat-stream`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatQuery {
    pub prompt: String,
    pub session_id: Option<String>,
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    pub session_id: Option<String>,
}

/// Body of `POST /chat`, the non-streaming form.
///
/// Extra fields such as `model` or `stream` are accepted and ignored; the
/// configured model always answers.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyRequest {
    pub message: String,
    pub session_id: Option<String>,
}
