//! OpenAI-compatible chat completions client
//!
//! Works against any server exposing `/chat/completions` with server-sent
//! event streaming (OpenAI, LiteLLM, vLLM, Ollama's `/v1` endpoint).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::base::{ChunkSource, ContextMessage, FragmentStream, SourceError, SourceResult};
use crate::framing::{fragment_stream, Decoded, Framing};

pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Chat completion request format
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ContextMessage>,
    stream: bool,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chunk source
pub struct OpenAIClient {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAIClient {
    /// Create a new OpenAI-compatible client
    pub fn new(
        api_key: Option<String>,
        api_base: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let api_base = api_base
            .filter(|base| !base.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE.to_string());

        Self {
            client: Client::builder()
                .http1_only() // Force HTTP/1.1 to avoid issues with some local servers
                .connect_timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
            temperature: 0.7,
            timeout,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn apply_headers(&self, mut req_builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }
        req_builder
    }

    fn decode_event(payload: &str) -> Decoded {
        if payload == "[DONE]" {
            return Decoded::End;
        }

        let chunk = match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => chunk,
            Err(err) => return Decoded::Failed(SourceError::Json(err)),
        };

        // Usage-only chunks arrive with no choices.
        match chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
        {
            Some(text) if !text.is_empty() => Decoded::Text(text),
            _ => Decoded::Skip,
        }
    }
}

#[async_trait]
impl ChunkSource for OpenAIClient {
    async fn open(&self, context: Vec<ContextMessage>) -> SourceResult<FragmentStream> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: context,
            stream: true,
            temperature: self.temperature,
        };

        debug!(
            "Sending streaming chat request to {} with model {}",
            self.api_base, self.model
        );

        let url = format!("{}/chat/completions", self.api_base);
        let send = self
            .apply_headers(self.client.post(&url).json(&request))
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| {
                SourceError::Timeout(format!("no response from {} within {:?}", url, self.timeout))
            })??;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SourceError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        Ok(fragment_stream(
            response,
            Framing::ServerSentEvents,
            self.timeout,
            Self::decode_event,
        ))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Fragment;
    use futures::StreamExt;

    #[test]
    fn test_decode_event() {
        assert!(matches!(OpenAIClient::decode_event("[DONE]"), Decoded::End));
        assert!(matches!(
            OpenAIClient::decode_event(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#),
            Decoded::Text(text) if text == "Hi"
        ));
        assert!(matches!(
            OpenAIClient::decode_event(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#),
            Decoded::Skip
        ));
        assert!(matches!(
            OpenAIClient::decode_event(r#"{"choices":[],"usage":{"total_tokens":3}}"#),
            Decoded::Skip
        ));
        assert!(matches!(
            OpenAIClient::decode_event("{broken"),
            Decoded::Failed(SourceError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_streams_sse_fragments() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there!\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4o-mini",
                "stream": true
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = OpenAIClient::new(
            Some("sk-test".to_string()),
            Some(server.url()),
            "gpt-4o-mini",
            Duration::from_secs(5),
        );
        let stream = client
            .open(vec![ContextMessage::user("Hello")])
            .await
            .unwrap();
        let items: Vec<Fragment> = stream.map(|item| item.unwrap()).collect().await;

        assert_eq!(
            items,
            vec![Fragment::text("Hi"), Fragment::text(" there!"), Fragment::End]
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_streams_crlf_delimited_events() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\r\n\r\n",
            ": ping\r\n\r\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there!\"}}]}\r\n\r\n",
            "data: [DONE]\r\n\r\n",
        );
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = OpenAIClient::new(
            Some("sk-test".to_string()),
            Some(server.url()),
            "gpt-4o-mini",
            Duration::from_secs(5),
        );
        let stream = client
            .open(vec![ContextMessage::user("Hello")])
            .await
            .unwrap();
        let items: Vec<Fragment> = stream.map(|item| item.unwrap()).collect().await;

        assert_eq!(
            items,
            vec![Fragment::text("Hi"), Fragment::text(" there!"), Fragment::End]
        );
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("{\"error\":\"invalid key\"}")
            .create_async()
            .await;

        let client = OpenAIClient::new(
            Some("bad".to_string()),
            Some(server.url()),
            "gpt-4o-mini",
            Duration::from_secs(5),
        );
        let err = client
            .open(vec![ContextMessage::user("Hello")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Api(ref msg) if msg.contains("401")));
    }
}
