//! Process-wide session store with per-session locking

use super::store::{Role, Session, Turn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed, bounded conversational memory shared by every stream.
///
/// The outer map lock is only held long enough to find or create a session
/// handle. All reads and appends go through the per-session async mutex, so
/// work on one session never waits on another.
#[derive(Debug)]
pub struct SessionStore {
    max_turns: usize,
    sessions: Mutex<HashMap<String, Arc<AsyncMutex<Session>>>>,
}

impl SessionStore {
    /// Create an empty store keeping at most `max_turns` turns per session
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    fn handle(&self, key: &str) -> Arc<AsyncMutex<Session>> {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(Session::new(key, self.max_turns))))
            .clone()
    }

    fn existing(&self, key: &str) -> Option<Arc<AsyncMutex<Session>>> {
        self.sessions.lock().get(key).cloned()
    }

    /// Take exclusive access to a session, creating it if unseen.
    ///
    /// Other requests on the same key wait until the guard is dropped.
    pub async fn lock(&self, key: &str) -> SessionGuard {
        let guard = self.handle(key).lock_owned().await;
        SessionGuard { guard }
    }

    /// Ordered turns for a session; empty if the key is unknown
    pub async fn get_history(&self, key: &str) -> Vec<Turn> {
        match self.existing(key) {
            Some(session) => session.lock().await.history(),
            None => Vec::new(),
        }
    }

    /// Append one turn to a session, evicting the oldest past the cap
    pub async fn append_turn(&self, key: &str, role: Role, content: impl Into<String>) {
        self.lock(key).await.append_turn(role, content);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Exclusive, owned access to one session
pub struct SessionGuard {
    guard: OwnedMutexGuard<Session>,
}

impl SessionGuard {
    pub fn history(&self) -> Vec<Turn> {
        self.guard.history()
    }

    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.guard.add_turn(role, content);
    }
}
