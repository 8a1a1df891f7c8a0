//! Core types for chat-relay
//!
//! This crate provides the configuration, logging, error and session-memory
//! building blocks shared by the streaming, provider and server crates.

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod session;

pub use error::{Error, Result};
