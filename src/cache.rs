//! Injectable result cache keyed by canonical repository URL.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::contract::WikiDocument;

pub trait WikiCache: Send + Sync {
    fn get(&self, key: &str) -> Option<WikiDocument>;
    fn insert(&self, key: &str, document: WikiDocument);
}

/// Caching disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl WikiCache for NoCache {
    fn get(&self, _key: &str) -> Option<WikiDocument> {
        None
    }

    fn insert(&self, _key: &str, _document: WikiDocument) {}
}

struct Entry {
    stored_at: Instant,
    document: WikiDocument,
}

/// In-process cache with a time-to-live and a bounded entry count. When full,
/// the oldest entry is evicted first.
pub struct MemoryCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // a panicked writer cannot leave an entry half-written
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WikiCache for MemoryCache {
    fn get(&self, key: &str) -> Option<WikiDocument> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                debug!(key, "Cache hit");
                return Some(entry.document.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!(key, "Cache entry expired");
            entries.remove(key);
        }
        None
    }

    fn insert(&self, key: &str, document: WikiDocument) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        let ttl = self.ttl;
        entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        while entries.len() >= self.capacity && !entries.contains_key(key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    debug!(key = %k, "Evicting oldest cache entry");
                    entries.remove(&k);
                }
                None => break,
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                stored_at: Instant::now(),
                document,
            },
        );
    }
}
