//! Deterministic chunk sources for tests

use async_trait::async_trait;
use chat_relay_providers::{
    ChunkSource, ContextMessage, Fragment, FragmentStream, SourceError, SourceResult,
};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::ManualClock;

/// One scripted action of a [`ScriptedSource`] stream
#[derive(Debug, Clone)]
pub enum Step {
    /// Yield text after moving the attached clock forward
    Text(String, Duration),
    /// Yield the end marker
    End,
    /// Yield a source failure
    Fail(String),
    /// Yield a read timeout
    Timeout(String),
    /// Never yield anything again
    Hang,
}

impl Step {
    pub fn text(text: impl Into<String>) -> Self {
        Step::Text(text.into(), Duration::ZERO)
    }

    pub fn text_after(text: impl Into<String>, delay: Duration) -> Self {
        Step::Text(text.into(), delay)
    }
}

struct LiveStream(Arc<AtomicUsize>);

impl LiveStream {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A chunk source that replays the same script on every `open`
pub struct ScriptedSource {
    script: Vec<Step>,
    open_error: Option<String>,
    clock: Option<ManualClock>,
    contexts: Mutex<Vec<Vec<ContextMessage>>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            open_error: None,
            clock: None,
            contexts: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Yield each text immediately, then the end marker
    pub fn fragments(texts: &[&str]) -> Self {
        let mut script: Vec<Step> = texts.iter().map(|t| Step::text(*t)).collect();
        script.push(Step::End);
        Self::new(script)
    }

    /// Fail every `open` call before producing anything
    pub fn failing(message: impl Into<String>) -> Self {
        let mut source = Self::new(Vec::new());
        source.open_error = Some(message.into());
        source
    }

    /// Advance `clock` by each step's delay as the step is yielded
    pub fn with_clock(mut self, clock: ManualClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Contexts received by every `open` call, in order
    pub fn contexts(&self) -> Vec<Vec<ContextMessage>> {
        self.contexts.lock().clone()
    }

    /// Streams opened and not yet dropped
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn open(&self, context: Vec<ContextMessage>) -> SourceResult<FragmentStream> {
        self.contexts.lock().push(context);

        if let Some(message) = &self.open_error {
            return Err(SourceError::Api(message.clone()));
        }

        let hangs = self.script.iter().any(|step| matches!(step, Step::Hang));
        let steps: Vec<Step> = self
            .script
            .iter()
            .take_while(|step| !matches!(step, Step::Hang))
            .cloned()
            .collect();

        let clock = self.clock.clone();
        let replay = stream::iter(steps).map(move |step| match step {
            Step::Text(text, delay) => {
                if let Some(clock) = &clock {
                    clock.advance(delay);
                }
                Ok(Fragment::Text(text))
            }
            Step::End => Ok(Fragment::End),
            Step::Fail(message) => Err(SourceError::Api(message)),
            Step::Timeout(message) => Err(SourceError::Timeout(message)),
            // Cut from the replay above; the tail below does the hanging.
            Step::Hang => Err(SourceError::InvalidResponse("scripted hang".to_string())),
        });

        let tail: BoxStream<'static, SourceResult<Fragment>> = if hangs {
            stream::pending().boxed()
        } else {
            stream::empty().boxed()
        };

        let live = LiveStream::new(Arc::clone(&self.live));
        Ok(replay
            .chain(tail)
            .map(move |item| {
                let _live = &live;
                item
            })
            .boxed())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
