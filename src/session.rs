//! Cookie-session bookkeeping for the monitored and control endpoints.

use crate::error::Result;
use crate::keys;
use crate::store::Store;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use tracing::info;

/// One authenticated session.
#[derive(Clone, Debug, PartialEq)]
pub struct Session<T> {
    pub id: String,
    pub value: T,
}

/// Live sessions keyed by id.
pub struct SessionStore<T> {
    sessions: RwLock<HashMap<String, Session<T>>>,
}

/// 256-bit random session id, URL-safe base64 without padding.
fn session_id() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

impl<T: Clone> SessionStore<T> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a session carrying `value`.
    pub fn create(&self, value: T) -> Result<Session<T>> {
        let id = session_id()?;
        let session = Session {
            id: id.clone(),
            value,
        };
        self.sessions.write().insert(id.clone(), session.clone());
        info!(session = %id, "Session created");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Session<T>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn get_value(&self, id: &str) -> Option<T> {
        self.get(id).map(|s| s.value)
    }

    /// Check whether `id` names a live session.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Close a session. Returns false if it did not exist.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            info!(session = %id, "Session deleted");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drop every session.
    pub fn reset(&self) {
        self.sessions.write().clear();
        info!("Sessions reset");
    }

    /// Mirror the session count into `session.count`.
    pub fn publish_count(&self, store: &Store) {
        store.set(keys::SESSION_COUNT, self.count());
    }
}

impl<T: Clone> Default for SessionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
