//! Ollama native chat client
//!
//! Streams `/api/chat`, which answers with one JSON object per line and a
//! final object carrying `"done": true`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::base::{ChunkSource, ContextMessage, FragmentStream, SourceError, SourceResult};
use crate::framing::{fragment_stream, Decoded, Framing};

pub const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ContextMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Ollama chunk source
pub struct OllamaClient {
    client: Client,
    api_base: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(api_base: Option<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let api_base = api_base
            .filter(|base| !base.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OLLAMA_BASE.to_string());

        Self {
            client: Client::builder()
                .connect_timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_base: api_base.trim_end_matches('/').to_string(),
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

    fn decode_line(line: &str) -> Decoded {
        let chunk = match serde_json::from_str::<ChatChunk>(line) {
            Ok(chunk) => chunk,
            Err(err) => return Decoded::Failed(SourceError::Json(err)),
        };

        if let Some(error) = chunk.error {
            return Decoded::Failed(SourceError::Api(error));
        }

        let text = chunk
            .message
            .map(|message| message.content)
            .filter(|content| !content.is_empty());

        // The completion line may still carry trailing text.
        match (text, chunk.done) {
            (Some(text), false) => Decoded::Text(text),
            (None, false) => Decoded::Skip,
            (Some(text), true) => Decoded::Last(text),
            (None, true) => Decoded::End,
        }
    }
}

#[async_trait]
impl ChunkSource for OllamaClient {
    async fn open(&self, context: Vec<ContextMessage>) -> SourceResult<FragmentStream> {
        let request = ChatRequest {
            model: &self.model,
            messages: context,
            stream: true,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        debug!(
            "Opening Ollama stream at {} with model {}",
            self.api_base, self.model
        );

        let url = format!("{}/api/chat", self.api_base);
        let send = self.client.post(&url).json(&request).send();
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
            Framing::Ndjson,
            self.timeout,
            Self::decode_line,
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

    fn client_for(server: &mockito::ServerGuard) -> OllamaClient {
        OllamaClient::new(Some(server.url()), "llama2", Duration::from_secs(5))
    }

    async fn collect(stream: FragmentStream) -> Vec<SourceResult<Fragment>> {
        stream.collect().await
    }

    #[test]
    fn test_default_base() {
        let client = OllamaClient::new(None, "llama2", Duration::from_secs(1));
        assert_eq!(client.api_base(), DEFAULT_OLLAMA_BASE);

        let client = OllamaClient::new(
            Some("http://gpu:11434/".to_string()),
            "llama2",
            Duration::from_secs(1),
        );
        assert_eq!(client.api_base(), "http://gpu:11434");
    }

    #[test]
    fn test_decode_line() {
        assert!(matches!(
            OllamaClient::decode_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#),
            Decoded::Text(text) if text == "Hi"
        ));
        assert!(matches!(
            OllamaClient::decode_line(r#"{"message":{"role":"assistant","content":""},"done":false}"#),
            Decoded::Skip
        ));
        assert!(matches!(
            OllamaClient::decode_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#),
            Decoded::End
        ));
        assert!(matches!(
            OllamaClient::decode_line(r#"{"message":{"role":"assistant","content":"!"},"done":true}"#),
            Decoded::Last(text) if text == "!"
        ));
        assert!(matches!(
            OllamaClient::decode_line(r#"{"error":"model 'llama9' not found"}"#),
            Decoded::Failed(SourceError::Api(msg)) if msg.contains("llama9")
        ));
        assert!(matches!(
            OllamaClient::decode_line("not json"),
            Decoded::Failed(SourceError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_streams_fragments_until_done() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\" there\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "llama2",
                "stream": true,
                "messages": [{"role": "user", "content": "Hello"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(body)
            .create_async()
            .await;

        let stream = client_for(&server)
            .open(vec![ContextMessage::user("Hello")])
            .await
            .unwrap();
        let items: Vec<Fragment> = collect(stream)
            .await
            .into_iter()
            .map(|item| item.unwrap())
            .collect();

        assert_eq!(
            items,
            vec![Fragment::text("Hi"), Fragment::text(" there"), Fragment::End]
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_fails_open() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(404)
            .with_body("{\"error\":\"model not found\"}")
            .create_async()
            .await;

        let err = client_for(&server)
            .open(vec![ContextMessage::user("Hello")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Api(ref msg) if msg.contains("404")));
    }

    #[tokio::test]
    async fn test_error_line_mid_stream() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Par\"},\"done\":false}\n",
            "{\"error\":\"out of memory\"}\n",
        );
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let stream = client_for(&server)
            .open(vec![ContextMessage::user("Hello")])
            .await
            .unwrap();
        let items = collect(stream).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Fragment::text("Par"));
        assert!(matches!(items[1], Err(SourceError::Api(ref msg)) if msg == "out of memory"));
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;

            let line = "{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n";
            let head = concat!(
                "HTTP/1.1 200 OK\r\n",
                "content-type: application/x-ndjson\r\n",
                "transfer-encoding: chunked\r\n\r\n",
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket
                .write_all(format!("{:x}\r\n{}\r\n", line.len(), line).as_bytes())
                .await
                .unwrap();
            socket.flush().await.unwrap();

            // Hold the connection open without sending anything else.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let client = OllamaClient::new(
            Some(format!("http://{}", addr)),
            "llama2",
            Duration::from_millis(300),
        );
        let stream = client
            .open(vec![ContextMessage::user("Hello")])
            .await
            .unwrap();
        let items = tokio::time::timeout(Duration::from_secs(5), collect(stream))
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Fragment::text("Hi"));
        assert!(matches!(&items[1], Err(err) if err.is_timeout()));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let client = OllamaClient::new(
            Some("http://127.0.0.1:1".to_string()),
            "llama2",
            Duration::from_secs(2),
        );
        let result = client.open(vec![ContextMessage::user("Hello")]).await;
        assert!(result.is_err());
    }
}
