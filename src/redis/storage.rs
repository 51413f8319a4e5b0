use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[derive(Clone, Debug)]
pub struct Entry {
    pub payload: Vec<u8>,
    pub expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, at_ms: i64) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => at_ms < expires_at,
        }
    }
}

/// The shared key-value mapping. Backed by `DashMap` so concurrent connection workers and the
/// follower apply loop can read/write without a single lock serializing every operation.
/// Expiration is lazy: a read of a dead entry removes it and reports absence.
pub struct Keyspace {
    data: DashMap<Vec<u8>, Entry>,
}

impl Keyspace {
    pub fn new() -> Self {
        Keyspace {
            data: DashMap::new(),
        }
    }

    pub fn set(&self, key: Vec<u8>, payload: Vec<u8>, expires_at: Option<i64>) {
        self.data.insert(key, Entry { payload, expires_at });
    }

    /// Load an entry as-is (used by RDB loading, which carries its own absolute expiry).
    pub fn load(&self, key: Vec<u8>, entry: Entry) {
        self.data.insert(key, entry);
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let now = now_ms();
        if let Some(entry) = self.data.get(key) {
            if entry.is_live(now) {
                return Some(entry.payload.clone());
            }
        } else {
            return None;
        }
        self.data.remove(key);
        None
    }

    /// Remove a key, returning whether it was present (and live).
    pub fn del(&self, key: &[u8]) -> bool {
        match self.get(key) {
            Some(_) => {
                self.data.remove(key);
                true
            }
            None => false,
        }
    }

    pub fn flushdb(&self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// A point-in-time snapshot of all live keys, built while iterating so concurrent
    /// mutations during the scan can't produce a torn view.
    pub fn keys_all(&self) -> Vec<Vec<u8>> {
        let now = now_ms();
        let mut expired = Vec::new();
        let mut live = Vec::new();
        for entry in self.data.iter() {
            if entry.value().is_live(now) {
                live.push(entry.key().clone());
            } else {
                expired.push(entry.key().clone());
            }
        }
        for key in expired {
            self.data.remove(&key);
        }
        live
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}
