//! Streaming core for chat-relay
//!
//! Turns a chunk source's fragments into coalesced, session-aware event
//! streams ready to be framed for the client.

pub mod clock;
pub mod coalescer;
pub mod event;
pub mod policy;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coalescer::{EventStream, Phase, StreamCoalescer, DEFAULT_SESSION_ID};
pub use event::{StreamEvent, StreamFailure, DONE_MARKER, NO_CONTENT_NOTICE};
pub use policy::{FlushPolicy, DEFAULT_FLUSH_INTERVAL};
