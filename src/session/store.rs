//! In-memory session storage.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::store::ExpiringMap;

/// Key/value state for one browser session.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub values: HashMap<String, String>,
    pub flash: Vec<String>,
}

/// Sessions keyed by id, dropped after `idle_ttl` without activity.
pub struct SessionStore {
    sessions: ExpiringMap<String, SessionData>,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: ExpiringMap::new(idle_ttl),
        }
    }

    /// Allocate a new empty session and return its id.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.sessions.insert_at(id.clone(), SessionData::default(), Instant::now());
        id
    }

    /// True when `id` names a live session. Touches it.
    pub fn touch(&self, id: &str) -> bool {
        self.sessions.update_at(&id.to_string(), Instant::now(), |_| ()).is_some()
    }

    pub fn get(&self, id: &str, key: &str) -> Option<String> {
        self.sessions
            .update_at(&id.to_string(), Instant::now(), |data| data.values.get(key).cloned())
            .flatten()
    }

    /// Value for `key`, initialized with `init` when absent. The read and
    /// the write happen under one lock.
    pub fn get_or_insert_with(&self, id: &str, key: &str, init: impl FnOnce() -> String) -> String {
        self.sessions.with_entry_at(
            id.to_string(),
            Instant::now(),
            SessionData::default,
            |data| data.values.entry(key.to_string()).or_insert_with(init).clone(),
        )
    }

    pub fn insert(&self, id: &str, key: &str, value: String) {
        self.sessions.with_entry_at(
            id.to_string(),
            Instant::now(),
            SessionData::default,
            |data| {
                data.values.insert(key.to_string(), value);
            },
        );
    }

    pub fn push_flash(&self, id: &str, message: String) {
        self.sessions.with_entry_at(
            id.to_string(),
            Instant::now(),
            SessionData::default,
            |data| data.flash.push(message),
        );
    }

    pub fn take_flash(&self, id: &str) -> Vec<String> {
        self.sessions
            .update_at(&id.to_string(), Instant::now(), |data| std::mem::take(&mut data.flash))
            .unwrap_or_default()
    }

    pub fn destroy(&self, id: &str) -> bool {
        self.sessions.remove(&id.to_string()).is_some()
    }

    pub fn prune(&self, now: Instant) -> usize {
        self.sessions.prune_at(now)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
