//! Configuration validation rules.

use super::schema::{Config, ProviderKind};

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.server.port == 0 {
        errors.push("server.port must be > 0".to_string());
    }
    if config.server.host.trim().is_empty() {
        errors.push("server.host must not be empty".to_string());
    }

    if config.provider.model.trim().is_empty() {
        errors.push("provider.model must not be empty".to_string());
    }
    if config.provider.timeout_secs == 0 {
        errors.push("provider.timeout_secs must be > 0".to_string());
    }
    if !(0.0..=2.0).contains(&config.provider.temperature) {
        errors.push("provider.temperature must be in [0.0, 2.0]".to_string());
    }
    if config.provider.kind == ProviderKind::OpenAI && config.provider.api_key.trim().is_empty() {
        errors.push("provider.api_key is required when provider.kind is openai".to_string());
    }

    if config.stream.flush_interval_ms == 0 {
        errors.push("stream.flush_interval_ms must be > 0".to_string());
    }
    if config.stream.max_turns == 0 {
        errors.push("stream.max_turns must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
