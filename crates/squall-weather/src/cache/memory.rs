use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use squall_core::Clock;

use super::{CacheBackend, CacheError};

#[derive(Debug)]
struct Slot {
    value: String,
    expires_at: f64,
}

/// Expiry instant ordered with `total_cmp` so it can key a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
struct Expiry(f64);

impl PartialEq for Expiry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Expiry {}

impl PartialOrd for Expiry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Expiry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Slots plus an index ordered by expiry, kept in step under one lock.
#[derive(Debug, Default)]
struct Slots {
    by_key: HashMap<String, Slot>,
    by_expiry: BTreeSet<(Expiry, String)>,
}

impl Slots {
    fn insert(&mut self, key: &str, slot: Slot) {
        self.by_expiry.insert((Expiry(slot.expires_at), key.to_string()));
        if let Some(old) = self.by_key.insert(key.to_string(), slot) {
            self.by_expiry.remove(&(Expiry(old.expires_at), key.to_string()));
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.by_key.remove(key) {
            self.by_expiry.remove(&(Expiry(old.expires_at), key.to_string()));
        }
    }

    fn pop_soonest(&mut self) -> Option<(f64, String)> {
        let (expiry, key) = self.by_expiry.pop_first()?;
        self.by_key.remove(&key);
        Some((expiry.0, key))
    }

    fn soonest_expiry(&self) -> Option<f64> {
        self.by_expiry.first().map(|(expiry, _)| expiry.0)
    }
}

/// In-process tier with per-key expiry and a capacity bound.
#[derive(Debug)]
pub struct MemoryBackend {
    slots: Mutex<Slots>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make room for one insert: drop expired slots, then the ones closest to expiry.
    fn evict(slots: &mut Slots, max_entries: usize, now: f64) {
        if slots.by_key.len() < max_entries {
            return;
        }

        while slots.soonest_expiry().is_some_and(|expires_at| now > expires_at) {
            slots.pop_soonest();
        }

        while slots.by_key.len() >= max_entries {
            match slots.pop_soonest() {
                Some((_, key)) => tracing::debug!(key = %key, "Evicting cache entry closest to expiry"),
                None => break,
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn tier(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();

        let expires_at = match slots.by_key.get(key) {
            Some(slot) if now <= slot.expires_at => return Ok(Some(slot.value.clone())),
            Some(slot) => slot.expires_at,
            None => return Ok(None),
        };
        tracing::trace!(key, expires_at, "Dropping expired cache entry");
        slots.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();

        if !slots.by_key.contains_key(key) {
            Self::evict(&mut slots, self.max_entries, now);
        }
        slots.insert(
            key,
            Slot {
                value: value.to_string(),
                expires_at: now + ttl_seconds as f64,
            },
        );
        Ok(())
    }
}
