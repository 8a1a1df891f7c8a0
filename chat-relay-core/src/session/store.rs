//! Session data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a conversation. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new turn stamped with the current time
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A bounded conversation.
///
/// Holds at most `max_turns` turns; appending beyond that evicts from the
/// front, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session key
    pub key: String,
    turns: VecDeque<Turn>,
    max_turns: usize,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new, empty session
    pub fn new(key: impl Into<String>, max_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            turns: VecDeque::with_capacity(max_turns),
            max_turns: max_turns.max(1),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn, evicting the oldest ones past the cap
    pub fn append(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
        self.updated_at = Utc::now();
    }

    /// Append a turn built from a role and its content
    pub fn add_turn(&mut self, role: Role, content: impl Into<String>) {
        self.append(Turn::new(role, content));
    }

    /// Ordered copy of the retained turns, oldest first
    pub fn history(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = Session::new("default", 5);
        assert_eq!(session.key, "default");
        assert!(session.is_empty());
        assert_eq!(session.max_turns(), 5);
    }

    #[test]
    fn test_add_turn_keeps_order() {
        let mut session = Session::new("test", 5);
        session.add_turn(Role::User, "Hello");
        session.add_turn(Role::Assistant, "Hi there!");

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "Hi there!");
    }

    #[test]
    fn test_sixth_turn_evicts_oldest() {
        let mut session = Session::new("test", 5);
        for i in 0..6 {
            session.add_turn(Role::User, format!("Message {}", i));
        }

        let contents: Vec<String> = session.history().into_iter().map(|t| t.content).collect();
        assert_eq!(
            contents,
            vec!["Message 1", "Message 2", "Message 3", "Message 4", "Message 5"]
        );
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let mut session = Session::new("test", 0);
        session.add_turn(Role::User, "a");
        session.add_turn(Role::User, "b");
        assert_eq!(session.len(), 1);
        assert_eq!(session.history()[0].content, "b");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let turn = Turn::assistant("ok");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"], "ok");
    }
}
