//! Stream coalescer
//!
//! Drives a chunk source for one request, batches its fragments according to
//! the flush policy and records the exchange in session memory.
//!
//! ```text
//! Init -> Streaming -> Draining -> Done
//!            \            \
//!             +------------+---> Failed
//! ```
//!
//! Every path ends with exactly one [`StreamEvent::Done`]. The only
//! suspension points are acquiring the session and awaiting the source.

use chat_relay_core::session::{Role, SessionGuard, SessionStore};
use chat_relay_providers::{ChunkSource, ContextMessage, Fragment, FragmentStream, SourceError};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::event::{StreamEvent, StreamFailure, NO_CONTENT_NOTICE};
use crate::policy::FlushPolicy;

pub const DEFAULT_SESSION_ID: &str = "default";

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Lifecycle of one coalesced stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Streaming,
    Draining,
    Done,
    Failed,
}

/// Factory for coalesced streams sharing one source and session store
#[derive(Clone)]
pub struct StreamCoalescer {
    source: Arc<dyn ChunkSource>,
    sessions: Arc<SessionStore>,
    policy: FlushPolicy,
    clock: Arc<dyn Clock>,
    system_prompt: Option<String>,
}

impl StreamCoalescer {
    pub fn new(source: Arc<dyn ChunkSource>, sessions: Arc<SessionStore>) -> Self {
        Self {
            source,
            sessions,
            policy: FlushPolicy::default(),
            clock: Arc::new(SystemClock),
            system_prompt: None,
        }
    }

    pub fn with_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Prepend a system message to every request context
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Start a lazy stream answering `prompt` within `session_id`.
    ///
    /// Nothing happens until the stream is polled. Dropping it stops pulling
    /// from the source and leaves the session without an assistant turn.
    pub fn stream(&self, prompt: impl Into<String>, session_id: impl Into<String>) -> EventStream {
        let active = ActiveStream::new(self.clone(), prompt.into(), session_id.into());
        Box::pin(futures::stream::unfold(active, |mut active| async move {
            active.next_event().await.map(|event| (event, active))
        }))
    }

    /// Drive a stream to completion and return the whole reply.
    ///
    /// An empty completion comes back as [`NO_CONTENT_NOTICE`].
    pub async fn reply(
        &self,
        prompt: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<String, StreamFailure> {
        let mut events = self.stream(prompt, session_id);
        let mut reply = String::new();
        let mut no_content = false;
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Content(text) => reply.push_str(&text),
                StreamEvent::NoContent => no_content = true,
                StreamEvent::Failed(failure) => return Err(failure),
                StreamEvent::Done => break,
            }
        }
        if no_content {
            return Ok(NO_CONTENT_NOTICE.to_string());
        }
        Ok(reply)
    }
}

/// State owned by one in-flight stream
struct ActiveStream {
    coalescer: StreamCoalescer,
    prompt: String,
    session_id: String,
    phase: Phase,
    session: Option<SessionGuard>,
    fragments: Option<FragmentStream>,
    buffer: String,
    full_response: String,
    last_flush: Instant,
    pending: VecDeque<StreamEvent>,
    terminated: bool,
}

impl ActiveStream {
    fn new(coalescer: StreamCoalescer, prompt: String, session_id: String) -> Self {
        let last_flush = coalescer.clock.now();
        Self {
            coalescer,
            prompt,
            session_id,
            phase: Phase::Init,
            session: None,
            fragments: None,
            buffer: String::new(),
            full_response: String::new(),
            last_flush,
            pending: VecDeque::new(),
            terminated: false,
        }
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            match self.phase {
                Phase::Init => self.open().await,
                Phase::Streaming => self.pull().await,
                Phase::Draining => self.drain(),
                Phase::Done | Phase::Failed => {
                    if self.terminated {
                        return None;
                    }
                    self.terminated = true;
                    return Some(StreamEvent::Done);
                }
            }
        }
    }

    fn transition(&mut self, next: Phase) {
        debug!(session = %self.session_id, from = ?self.phase, to = ?next, "stream transition");
        self.phase = next;
    }

    async fn open(&mut self) {
        let mut session = self.coalescer.sessions.lock(&self.session_id).await;
        session.append_turn(Role::User, std::mem::take(&mut self.prompt));

        let history = session.history();
        let mut context = Vec::with_capacity(history.len() + 1);
        if let Some(system) = &self.coalescer.system_prompt {
            context.push(ContextMessage::system(system.clone()));
        }
        context.extend(history.iter().map(ContextMessage::from));
        self.session = Some(session);

        debug!(
            session = %self.session_id,
            model = self.coalescer.source.model(),
            messages = context.len(),
            "opening chunk source"
        );

        match self.coalescer.source.open(context).await {
            Ok(fragments) => {
                self.fragments = Some(fragments);
                self.last_flush = self.coalescer.clock.now();
                self.transition(Phase::Streaming);
            }
            Err(err) => self.fail(err),
        }
    }

    async fn pull(&mut self) {
        let next = match self.fragments.as_mut() {
            Some(fragments) => fragments.next().await,
            None => None,
        };

        match next {
            Some(Ok(Fragment::Text(text))) => self.accept(&text),
            Some(Ok(Fragment::End)) | None => {
                self.fragments = None;
                self.transition(Phase::Draining);
            }
            Some(Err(err)) => self.fail(err),
        }
    }

    fn accept(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.buffer.push_str(text);
        self.full_response.push_str(text);

        let now = self.coalescer.clock.now();
        if let Some(len) = self
            .coalescer
            .policy
            .flush_len(&self.buffer, now, self.last_flush)
        {
            let chunk: String = self.buffer.drain(..len).collect();
            trace!(session = %self.session_id, bytes = chunk.len(), "flush");
            self.last_flush = now;
            self.pending.push_back(StreamEvent::Content(chunk));
        }
    }

    fn drain(&mut self) {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            trace!(session = %self.session_id, bytes = rest.len(), "final flush");
            self.pending.push_back(StreamEvent::Content(rest));
        }

        // Whitespace alone is not a reply worth remembering.
        if self.full_response.trim().is_empty() {
            self.pending.push_back(StreamEvent::NoContent);
        } else if let Some(session) = self.session.as_mut() {
            session.append_turn(Role::Assistant, std::mem::take(&mut self.full_response));
        }

        // Release the session before the terminal marker goes out.
        self.session = None;
        self.transition(Phase::Done);
    }

    fn fail(&mut self, err: SourceError) {
        warn!(session = %self.session_id, error = %err, "chunk source failed");
        self.fragments = None;
        self.session = None;
        self.buffer.clear();
        self.pending.push_back(StreamEvent::Failed(err.into()));
        self.transition(Phase::Failed);
    }
}
