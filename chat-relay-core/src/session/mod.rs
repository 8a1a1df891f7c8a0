//! Bounded conversational memory
//!
//! Sessions keep a short, fixed number of turns in memory for the lifetime of
//! the process and are used to build the context of the next request.

pub mod manager;
pub mod store;

pub use manager::{SessionGuard, SessionStore};
pub use store::{Role, Session, Turn};
