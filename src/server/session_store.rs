use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::{chat::Conversation, utils::log};

pub type SharedConversation = Arc<tokio::sync::Mutex<Conversation>>;

pub const DEFAULT_SESSION_IDLE_SECS: u64 = 60 * 60;

#[derive(Debug)]
struct Session {
    conversation: SharedConversation,
    last_access: Instant,
}

/// Conversations keyed by browser session.
///
/// The map lock is only held to look a session up. The per-session lock is async and is held by
/// a turn for as long as it streams, so a session runs at most one turn at a time.
///
/// Sessions not touched for `idle_ttl` are dropped the next time a session is created. A session
/// whose conversation is still referenced elsewhere, such as by a running turn, is never dropped.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    idle_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_idle_ttl(Duration::from_secs(DEFAULT_SESSION_IDLE_SECS))
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn get_or_create(&self, id: Uuid) -> SharedConversation {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        self.evict_idle(&mut sessions, now);

        let session = sessions.entry(id).or_insert_with(|| Session {
            conversation: SharedConversation::default(),
            last_access: now,
        });
        session.last_access = now;
        session.conversation.clone()
    }

    pub fn get(&self, id: &Uuid) -> Option<SharedConversation> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(id)?;
        session.last_access = Instant::now();
        Some(session.conversation.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    fn evict_idle(&self, sessions: &mut HashMap<Uuid, Session>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, session| {
            Arc::strong_count(&session.conversation) > 1
                || now.duration_since(session.last_access) < self.idle_ttl
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            log::debug(format!("Dropped {evicted} idle session(s)"));
        }
    }
}
