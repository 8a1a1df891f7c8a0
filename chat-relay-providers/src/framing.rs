//! Response body framing shared by the HTTP chunk sources
//!
//! Bodies are read chunk by chunk on the consumer's task, so dropping the
//! returned stream closes the connection and nothing keeps reading in the
//! background.

use std::collections::VecDeque;
use std::time::Duration;

use crate::base::{Fragment, FragmentStream, SourceError, SourceResult};

/// How a streaming response body is split into frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// One JSON document per line
    Ndjson,
    /// `data:` lines separated by a blank line
    ServerSentEvents,
}

/// Result of decoding one frame
#[derive(Debug)]
pub(crate) enum Decoded {
    Skip,
    Text(String),
    /// Final frame that still carries text
    Last(String),
    End,
    Failed(SourceError),
}

pub(crate) type FrameDecoder = fn(&str) -> Decoded;

impl Framing {
    /// Pull the next complete frame out of `buffer`, if any
    pub(crate) fn next_frame(&self, buffer: &mut Vec<u8>) -> Option<String> {
        loop {
            let (raw, consumed) = match self {
                Framing::Ndjson => {
                    let pos = buffer.iter().position(|b| *b == b'\n')?;
                    (String::from_utf8_lossy(&buffer[..pos]).into_owned(), pos + 1)
                }
                Framing::ServerSentEvents => {
                    let (pos, len) = event_boundary(buffer)?;
                    (String::from_utf8_lossy(&buffer[..pos]).into_owned(), pos + len)
                }
            };
            buffer.drain(..consumed);

            if let Some(frame) = self.extract(&raw) {
                return Some(frame);
            }
        }
    }

    /// Whatever is left in `buffer` once the body has ended
    pub(crate) fn trailing_frame(&self, buffer: &mut Vec<u8>) -> Option<String> {
        if buffer.is_empty() {
            return None;
        }
        let raw = String::from_utf8_lossy(buffer).into_owned();
        buffer.clear();
        self.extract(&raw)
    }

    fn extract(&self, raw: &str) -> Option<String> {
        match self {
            Framing::Ndjson => {
                let line = raw.trim();
                (!line.is_empty()).then(|| line.to_string())
            }
            Framing::ServerSentEvents => {
                let data_lines: Vec<&str> = raw
                    .split(['\r', '\n'])
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim)
                    .collect();
                (!data_lines.is_empty()).then(|| data_lines.join("\n"))
            }
        }
    }
}

/// Position and length of the first blank line ending an SSE event.
///
/// Servers may end lines with LF, CRLF or a bare CR.
fn event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    const TERMINATORS: [&[u8]; 3] = [b"\r\n\r\n", b"\n\n", b"\r\r"];
    (0..buffer.len()).find_map(|pos| {
        TERMINATORS
            .iter()
            .find(|sep| buffer[pos..].starts_with(sep))
            .map(|sep| (pos, sep.len()))
    })
}

struct BodyReader {
    response: reqwest::Response,
    framing: Framing,
    decode: FrameDecoder,
    read_timeout: Duration,
    buffer: Vec<u8>,
    pending: VecDeque<SourceResult<Fragment>>,
    finished: bool,
}

impl BodyReader {
    fn ingest(&mut self, frame: &str) {
        if self.finished {
            return;
        }
        match (self.decode)(frame) {
            Decoded::Skip => {}
            Decoded::Text(text) => self.pending.push_back(Ok(Fragment::Text(text))),
            Decoded::Last(text) => {
                self.pending.push_back(Ok(Fragment::Text(text)));
                self.pending.push_back(Ok(Fragment::End));
                self.finished = true;
            }
            Decoded::End => {
                self.pending.push_back(Ok(Fragment::End));
                self.finished = true;
            }
            Decoded::Failed(err) => {
                self.pending.push_back(Err(err));
                self.finished = true;
            }
        }
    }

    async fn read_more(&mut self) {
        match tokio::time::timeout(self.read_timeout, self.response.chunk()).await {
            Err(_) => {
                self.pending.push_back(Err(SourceError::Timeout(format!(
                    "no data from backend for {}s",
                    self.read_timeout.as_secs()
                ))));
                self.finished = true;
            }
            Ok(Err(err)) => {
                self.pending.push_back(Err(SourceError::Http(err)));
                self.finished = true;
            }
            Ok(Ok(Some(bytes))) => {
                self.buffer.extend_from_slice(&bytes);
                while let Some(frame) = self.framing.next_frame(&mut self.buffer) {
                    self.ingest(&frame);
                }
            }
            Ok(Ok(None)) => {
                if let Some(frame) = self.framing.trailing_frame(&mut self.buffer) {
                    self.ingest(&frame);
                }
                // A body that closes without an explicit marker still completes.
                if !self.finished {
                    self.pending.push_back(Ok(Fragment::End));
                    self.finished = true;
                }
            }
        }
    }
}

/// Turn a streaming HTTP response into a fragment stream
pub(crate) fn fragment_stream(
    response: reqwest::Response,
    framing: Framing,
    read_timeout: Duration,
    decode: FrameDecoder,
) -> FragmentStream {
    let reader = BodyReader {
        response,
        framing,
        decode,
        read_timeout,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(item) = reader.pending.pop_front() {
                return Some((item, reader));
            }
            if reader.finished {
                return None;
            }
            reader.read_more().await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndjson_frames() {
        let mut buffer = b"{\"a\":1}\n\n  {\"b\":2}\n{\"c\"".to_vec();
        assert_eq!(
            Framing::Ndjson.next_frame(&mut buffer).as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            Framing::Ndjson.next_frame(&mut buffer).as_deref(),
            Some("{\"b\":2}")
        );
        assert_eq!(Framing::Ndjson.next_frame(&mut buffer), None);
        assert_eq!(buffer, b"{\"c\"");
        assert_eq!(
            Framing::Ndjson.trailing_frame(&mut buffer).as_deref(),
            Some("{\"c\"")
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_sse_frames() {
        let mut buffer =
            b"data: {\"a\":1}\n\n: keep-alive\n\ndata: [DONE]\n\ntrailing".to_vec();
        assert_eq!(
            Framing::ServerSentEvents.next_frame(&mut buffer).as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            Framing::ServerSentEvents.next_frame(&mut buffer).as_deref(),
            Some("[DONE]")
        );
        assert_eq!(Framing::ServerSentEvents.next_frame(&mut buffer), None);
        assert_eq!(buffer, b"trailing");
    }

    #[test]
    fn test_sse_crlf_frames() {
        let mut buffer = b"data: {\"a\":1}\r\n\r\ndata: [DONE]\r\n\r\n".to_vec();
        assert_eq!(
            Framing::ServerSentEvents.next_frame(&mut buffer).as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            Framing::ServerSentEvents.next_frame(&mut buffer).as_deref(),
            Some("[DONE]")
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_sse_crlf_split_across_chunks() {
        let mut buffer = b"event: message\r\ndata: {\"a\":1}\r\n\r".to_vec();
        assert_eq!(Framing::ServerSentEvents.next_frame(&mut buffer), None);
        buffer.extend_from_slice(b"\ndata: x\r\rdata: y");
        assert_eq!(
            Framing::ServerSentEvents.next_frame(&mut buffer).as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            Framing::ServerSentEvents.next_frame(&mut buffer).as_deref(),
            Some("x")
        );
        assert_eq!(
            Framing::ServerSentEvents.trailing_frame(&mut buffer).as_deref(),
            Some("y")
        );
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let text = "héllo\n".as_bytes();
        let mut buffer = text[..2].to_vec();
        assert_eq!(Framing::Ndjson.next_frame(&mut buffer), None);
        buffer.extend_from_slice(&text[2..]);
        assert_eq!(
            Framing::Ndjson.next_frame(&mut buffer).as_deref(),
            Some("héllo")
        );
    }
}
