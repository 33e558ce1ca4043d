//! Per-user conversational state. The only multi-turn flow is the search
//! prompt, so state is a small enum with a TTL rather than a full session
//! object.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Abandoned prompts expire so a message sent days later is not swallowed
/// as search input.
const SESSION_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    /// The user ran `SearchResource`; their next free-text message is the
    /// search query.
    AwaitingSearchInput,
}

struct Entry {
    state: SessionState,
    updated_at: Instant,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Current state for a user; expired entries read as `Idle` and are
    /// dropped on the way out.
    pub async fn get(&self, user: &str) -> SessionState {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(user) {
            Some(entry) if entry.updated_at.elapsed() < self.ttl => entry.state,
            Some(_) => {
                debug!("session: expired state for {} dropped", user);
                sessions.remove(user);
                SessionState::Idle
            }
            None => SessionState::Idle,
        }
    }

    pub async fn set(&self, user: &str, state: SessionState) {
        let mut sessions = self.sessions.lock().await;
        if state == SessionState::Idle {
            sessions.remove(user);
        } else {
            sessions.insert(
                user.to_string(),
                Entry {
                    state,
                    updated_at: Instant::now(),
                },
            );
        }
    }

    pub async fn clear(&self, user: &str) {
        self.sessions.lock().await.remove(user);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_idle() {
        let store = SessionStore::new();
        assert_eq!(store.get("nobody").await, SessionState::Idle);
    }

    #[tokio::test]
    async fn set_get_clear() {
        let store = SessionStore::new();
        store.set("u1", SessionState::AwaitingSearchInput).await;
        assert_eq!(store.get("u1").await, SessionState::AwaitingSearchInput);
        assert_eq!(store.get("u2").await, SessionState::Idle);
        store.clear("u1").await;
        assert_eq!(store.get("u1").await, SessionState::Idle);
    }

    #[tokio::test]
    async fn setting_idle_removes_the_entry() {
        let store = SessionStore::new();
        store.set("u1", SessionState::AwaitingSearchInput).await;
        store.set("u1", SessionState::Idle).await;
        assert!(store.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn expired_entries_read_as_idle() {
        let store = SessionStore::with_ttl(Duration::ZERO);
        store.set("u1", SessionState::AwaitingSearchInput).await;
        assert_eq!(store.get("u1").await, SessionState::Idle);
        assert!(store.sessions.lock().await.is_empty());
    }
}
