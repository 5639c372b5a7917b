//! Bounded cache of generations whose owning view has moved on.
//!
//! Entries are advisory. A reader may find an entry gone by the time it acts
//! on it; a missing entry always means "nothing to resume".

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use docent_types::{ConversationId, Message};

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// An in-flight assistant message for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStreamEntry {
    pub conversation_id: ConversationId,
    pub message: Message,
    pub streaming: bool,
    pub first_content_signaled: bool,
    /// Creation or last refresh.
    pub updated_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
        }
    }
}

/// Capacity- and age-bounded map from conversation to in-flight message.
///
/// Every mutating call evicts first: entries older than the TTL go, then the
/// oldest remaining entries until the map fits the capacity.
#[derive(Debug, Default)]
pub struct ActiveStreamRegistry {
    entries: HashMap<ConversationId, ActiveStreamEntry>,
    limits: RegistryLimits,
}

impl ActiveStreamRegistry {
    #[must_use]
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            entries: HashMap::new(),
            limits: RegistryLimits {
                capacity: limits.capacity.max(1),
                ttl: limits.ttl,
            },
        }
    }

    #[must_use]
    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the entry for `entry.conversation_id`.
    pub fn put(&mut self, entry: ActiveStreamEntry) -> Option<ActiveStreamEntry> {
        let now = entry.updated_at;
        self.put_at(entry, now)
    }

    pub fn put_at(&mut self, entry: ActiveStreamEntry, now: Instant) -> Option<ActiveStreamEntry> {
        let previous = self.entries.insert(entry.conversation_id.clone(), entry);
        self.evict(now);
        previous
    }

    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&ActiveStreamEntry> {
        self.get_at(id, Instant::now())
    }

    /// Expired entries read as absent even before the next eviction.
    #[must_use]
    pub fn get_at(&self, id: &ConversationId, now: Instant) -> Option<&ActiveStreamEntry> {
        self.entries
            .get(id)
            .filter(|entry| !self.is_expired(entry, now))
    }

    pub fn delete(&mut self, id: &ConversationId) -> Option<ActiveStreamEntry> {
        self.delete_at(id, Instant::now())
    }

    pub fn delete_at(&mut self, id: &ConversationId, now: Instant) -> Option<ActiveStreamEntry> {
        let removed = self.entries.remove(id);
        self.evict(now);
        removed.filter(|entry| !self.is_expired(entry, now))
    }

    fn is_expired(&self, entry: &ActiveStreamEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.updated_at) > self.limits.ttl
    }

    fn evict(&mut self, now: Instant) {
        let ttl = self.limits.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.updated_at) <= ttl);

        while self.entries.len() > self.limits.capacity {
            let Some(oldest) = self
                .entries
                .values()
                .min_by_key(|entry| entry.updated_at)
                .map(|entry| entry.conversation_id.clone())
            else {
                break;
            };
            self.entries.remove(&oldest);
        }

        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.entries.len(), "Evicted registry entries");
        }
    }
}

/// Process-wide handle to one registry, shared by every session.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<Mutex<ActiveStreamRegistry>>,
}

impl SharedRegistry {
    #[must_use]
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ActiveStreamRegistry::new(limits))),
        }
    }

    // Every call leaves the map consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, ActiveStreamRegistry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, entry: ActiveStreamEntry) {
        self.lock().put(entry);
    }

    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<ActiveStreamEntry> {
        self.lock().get(id).cloned()
    }

    pub fn delete(&self, id: &ConversationId) -> Option<ActiveStreamEntry> {
        self.lock().delete(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
