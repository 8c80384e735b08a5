//! Per-session conversation state.
//!
//! Sessions are keyed by a caller-chosen opaque id and live in a bounded, idle-expiring
//! store. Turns on one session are serialized through [`SessionGate`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Oracle-owned state that lets a later turn resume the conversation. Opaque to
/// everything except the oracle that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OracleCheckpoint(pub Value);

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub turns: Vec<Turn>,
    pub checkpoint: Option<OracleCheckpoint>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self { id, turns: Vec::new(), checkpoint: None }
    }

    pub fn record_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(Turn { user: user.into(), assistant: assistant.into() });
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &SessionId) -> Option<Session>;
    async fn put(&self, session: Session);
    async fn evict(&self, id: &SessionId) -> bool;
    /// Drops expired sessions and returns how many were removed.
    async fn purge_expired(&self) -> usize;
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

struct Entry {
    session: Session,
    touched: Instant,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<SessionId, Entry>,
    recency: BTreeMap<u64, SessionId>,
    next_tick: u64,
}

impl LruState {
    fn touch(&mut self, id: &SessionId, now: Instant) {
        let tick = self.next_tick;
        if let Some(entry) = self.entries.get_mut(id) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            entry.touched = now;
            self.recency.insert(tick, id.clone());
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, id: &SessionId) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                true
            }
            None => false,
        }
    }

    fn evict_least_recent(&mut self) -> Option<SessionId> {
        let (_, id) = self.recency.pop_first()?;
        self.entries.remove(&id);
        Some(id)
    }
}

/// Bounded in-process store: idle sessions expire after `ttl`, and when `capacity` is
/// reached the least recently used session is evicted.
pub struct InMemorySessionStore {
    ttl: Duration,
    capacity: usize,
    state: Mutex<LruState>,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { ttl, capacity: capacity.max(1), state: Mutex::new(LruState::default()) }
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.touched) >= self.ttl
    }

    pub(crate) async fn get_at(&self, id: &SessionId, now: Instant) -> Option<Session> {
        let mut state = self.state.lock().await;
        let expired = self.is_expired(state.entries.get(id)?, now);
        if expired {
            state.remove(id);
            debug!(event_name = "session.expired", session_id = %id, "session expired");
            return None;
        }
        state.touch(id, now);
        state.entries.get(id).map(|entry| entry.session.clone())
    }

    pub(crate) async fn put_at(&self, session: Session, now: Instant) {
        let mut state = self.state.lock().await;
        let id = session.id.clone();

        if !state.entries.contains_key(&id) && state.entries.len() >= self.capacity {
            if let Some(evicted) = state.evict_least_recent() {
                debug!(event_name = "session.evicted", session_id = %evicted, "session evicted");
            }
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        if let Some(previous) = state.entries.insert(id.clone(), Entry { session, touched: now, tick }) {
            state.recency.remove(&previous.tick);
        }
        state.recency.insert(tick, id);
    }

    pub(crate) async fn purge_expired_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        let expired = state
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in &expired {
            state.remove(id);
        }
        expired.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &SessionId) -> Option<Session> {
        self.get_at(id, Instant::now()).await
    }

    async fn put(&self, session: Session) {
        self.put_at(session, Instant::now()).await
    }

    async fn evict(&self, id: &SessionId) -> bool {
        self.state.lock().await.remove(id)
    }

    async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now()).await
    }

    async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

/// Per-session mutual exclusion for whole turns.
#[derive(Default)]
pub struct SessionGate {
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionGate {
    /// Waits until no other turn holds `id`. The lock is released when the guard drops.
    pub async fn acquire(&self, id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|key, lock| key == id || Arc::strong_count(lock) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
