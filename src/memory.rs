// src/memory.rs
//
// Per-session conversational memory for the chat-completion adapter.
//
// The store is bounded on every axis: at most `max_sessions` sessions are
// kept (least-recently-used evicted first), each session keeps at most
// `max_turns` turn pairs, and a session idle past `ttl` is dropped on the
// next access. Cold misses are rehydrated from chat_history by the caller,
// so the memory survives restarts and stays consistent across workers that
// share the database.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
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

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug)]
struct SessionEntry {
    turns: Vec<Turn>,
    last_used: Instant,
}

#[derive(Debug)]
pub struct SessionMemory {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    max_sessions: usize,
    max_turns: usize,
    ttl: Duration,
}

impl SessionMemory {
    pub fn new(max_sessions: usize, max_turns: usize, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
            max_turns,
            ttl,
        }
    }

    /// History for a session, oldest turn first. Returns `None` when the
    /// session is unknown or its entry has expired (the caller should then
    /// rehydrate from the database).
    pub async fn history(&self, session_id: &str) -> Option<Vec<Turn>> {
        let mut sessions = self.sessions.lock().await;

        let expired = sessions
            .get(session_id)
            .map(|e| e.last_used.elapsed() > self.ttl)
            .unwrap_or(false);
        if expired {
            sessions.remove(session_id);
            tracing::debug!("Session memory expired for {}", session_id);
            return None;
        }

        let entry = sessions.get_mut(session_id)?;
        entry.last_used = Instant::now();
        Some(entry.turns.clone())
    }

    /// Records one user/assistant turn pair, creating the session entry if
    /// needed and evicting the least-recently-used session when at capacity.
    pub async fn record_turn(&self, session_id: &str, user: &str, assistant: &str) {
        let mut sessions = self.sessions.lock().await;

        if !sessions.contains_key(session_id) && sessions.len() >= self.max_sessions {
            if let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                tracing::debug!("Evicting session memory for {}", oldest);
                sessions.remove(&oldest);
            }
        }

        let entry = sessions.entry(session_id.to_string()).or_insert(SessionEntry {
            turns: Vec::new(),
            last_used: Instant::now(),
        });

        entry.turns.push(Turn {
            role: Role::User,
            content: user.to_string(),
        });
        entry.turns.push(Turn {
            role: Role::Assistant,
            content: assistant.to_string(),
        });

        // Trim to the newest max_turns pairs.
        let max_messages = self.max_turns * 2;
        if entry.turns.len() > max_messages {
            let excess = entry.turns.len() - max_messages;
            entry.turns.drain(..excess);
        }

        entry.last_used = Instant::now();
    }

    /// Replaces a session's history wholesale, used when rehydrating from
    /// persisted chat rows after a restart or eviction.
    pub async fn replace_history(&self, session_id: &str, turns: Vec<Turn>) {
        let mut sessions = self.sessions.lock().await;

        if !sessions.contains_key(session_id) && sessions.len() >= self.max_sessions {
            if let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                sessions.remove(&oldest);
            }
        }

        let max_messages = self.max_turns * 2;
        let turns = if turns.len() > max_messages {
            turns[turns.len() - max_messages..].to_vec()
        } else {
            turns
        };

        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                turns,
                last_used: Instant::now(),
            },
        );
    }
}

impl Default for SessionMemory {
    fn default() -> Self {
        // 1000 concurrent sessions, 20 turn pairs each, 30 minutes idle.
        Self::new(1000, 20, Duration::from_secs(30 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_returns_turns_in_order() {
        let memory = SessionMemory::new(10, 5, Duration::from_secs(60));
        memory.record_turn("s1", "hello", "hi there").await;
        memory.record_turn("s1", "what is acne", "a skin condition").await;

        let turns = memory.history("s1").await.expect("history");
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[3].role, Role::Assistant);
        assert_eq!(turns[3].content, "a skin condition");
    }

    #[tokio::test]
    async fn unknown_session_is_a_miss() {
        let memory = SessionMemory::new(10, 5, Duration::from_secs(60));
        assert!(memory.history("nope").await.is_none());
    }

    #[tokio::test]
    async fn caps_turns_per_session() {
        let memory = SessionMemory::new(10, 2, Duration::from_secs(60));
        memory.record_turn("s1", "a", "1").await;
        memory.record_turn("s1", "b", "2").await;
        memory.record_turn("s1", "c", "3").await;

        let turns = memory.history("s1").await.expect("history");
        // Only the newest two pairs survive.
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].content, "b");
        assert_eq!(turns[2].content, "c");
    }

    #[tokio::test]
    async fn evicts_least_recently_used_session() {
        let memory = SessionMemory::new(2, 5, Duration::from_secs(60));
        memory.record_turn("s1", "a", "1").await;
        memory.record_turn("s2", "b", "2").await;
        // Touch s1 so s2 becomes the eviction candidate.
        let _ = memory.history("s1").await;
        memory.record_turn("s3", "c", "3").await;

        assert!(memory.history("s1").await.is_some());
        assert!(memory.history("s2").await.is_none());
        assert!(memory.history("s3").await.is_some());
    }

    #[tokio::test]
    async fn expired_sessions_are_dropped_on_access() {
        let memory = SessionMemory::new(10, 5, Duration::from_millis(10));
        memory.record_turn("s1", "a", "1").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(memory.history("s1").await.is_none());
    }

    #[tokio::test]
    async fn replace_history_trims_to_capacity() {
        let memory = SessionMemory::new(10, 1, Duration::from_secs(60));
        let turns = vec![
            Turn { role: Role::User, content: "old".into() },
            Turn { role: Role::Assistant, content: "old reply".into() },
            Turn { role: Role::User, content: "new".into() },
            Turn { role: Role::Assistant, content: "new reply".into() },
        ];
        memory.replace_history("s1", turns).await;

        let turns = memory.history("s1").await.expect("history");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "new");
    }
}
