//! Chunk sources for chat-relay
//!
//! A chunk source turns a conversation context into a stream of text
//! fragments produced by a remote generation backend.

pub mod base;
mod framing;
pub mod ollama;
pub mod openai;

pub use base::{
    ChunkSource, ContextMessage, Fragment, FragmentStream, SourceError, SourceResult,
};
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

use chat_relay_core::config::{ProviderConfig, ProviderKind};
use std::sync::Arc;
use std::time::Duration;

/// Build the chunk source described by the provider configuration
pub fn build_source(config: &ProviderConfig) -> Arc<dyn ChunkSource> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.kind {
        ProviderKind::Ollama => Arc::new(
            OllamaClient::new(config.api_base.clone(), config.model.clone(), timeout)
                .with_temperature(config.temperature),
        ),
        ProviderKind::OpenAI => Arc::new(
            OpenAIClient::new(
                Some(config.api_key.clone()),
                config.api_base.clone(),
                config.model.clone(),
                timeout,
            )
            .with_temperature(config.temperature),
        ),
    }
}
