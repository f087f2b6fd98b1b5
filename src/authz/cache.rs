//! Process-local caches fronting the subject resolver and the decision engine.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::authz::selector::SelectorCache;
use crate::authz::subject::ResolvedSubject;
use crate::authz::types::Decision;

/// Which cache an invalidation targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Decision,
    Subject,
    Selector,
    #[default]
    All,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent map whose entries expire after a fixed TTL. Expired entries are
/// dropped lazily on read and in bulk by [`TtlCache::purge_expired`].
///
/// Every removal bumps a generation counter. Writers that computed a value
/// from older state use [`TtlCache::insert_if_current`] so a flush that raced
/// with the computation is not undone.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
    enabled: bool,
    generation: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            enabled: enabled && !ttl.is_zero(),
            generation: AtomicU64::new(0),
        }
    }

    /// Capture before computing a value to insert with
    /// [`TtlCache::insert_if_current`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        {
            if let Some(entry) = self.entries.get(key) {
                if entry.expires_at > now {
                    return Some(entry.value.clone());
                }
            }
        }
        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        if !self.enabled {
            return;
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Inserts unless a removal happened since `generation` was captured.
    /// Returns whether the value was kept.
    pub fn insert_if_current(&self, generation: u64, key: K, value: V) -> bool {
        if !self.enabled || self.generation() != generation {
            return false;
        }
        self.insert(key.clone(), value);
        // a flush between the check and the insert
        if self.generation() != generation {
            self.entries.remove(&key);
            return false;
        }
        true
    }

    pub fn remove(&self, key: &K) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(key);
    }

    pub fn flush(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    /// Drops expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Memoized parses keyed by raw input. No expiry.
#[derive(Debug)]
pub struct ParseCache<V> {
    entries: DashMap<String, Arc<V>>,
    enabled: bool,
}

impl<V> ParseCache<V> {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            enabled,
        }
    }

    pub fn get_or_parse<E>(
        &self,
        raw: &str,
        parse: impl FnOnce(&str) -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(hit) = self.entries.get(raw) {
            return Ok(Arc::clone(hit.value()));
        }
        let parsed = Arc::new(parse(raw)?);
        if self.enabled {
            self.entries.insert(raw.to_string(), Arc::clone(&parsed));
        }
        Ok(parsed)
    }

    pub fn flush(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub subject: String,
    pub object: String,
    pub action: String,
    pub fingerprint: String,
}

/// The three caches of one engine.
#[derive(Debug)]
pub struct Caches {
    pub decisions: TtlCache<DecisionKey, Decision>,
    pub subjects: TtlCache<String, Arc<ResolvedSubject>>,
    pub selectors: Arc<SelectorCache>,
}

impl Caches {
    pub fn new(enabled: bool, decision_ttl: Duration, subject_ttl: Duration) -> Self {
        Self {
            decisions: TtlCache::new(decision_ttl, enabled),
            subjects: TtlCache::new(subject_ttl, enabled),
            selectors: Arc::new(SelectorCache::new(enabled)),
        }
    }

    pub fn flush(&self, kind: CacheKind) {
        match kind {
            CacheKind::Decision => self.decisions.flush(),
            CacheKind::Subject => self.subjects.flush(),
            CacheKind::Selector => self.selectors.flush(),
            CacheKind::All => {
                self.decisions.flush();
                self.subjects.flush();
                self.selectors.flush();
            }
        }
        tracing::debug!(?kind, "Flushed cache");
    }

    pub fn purge_expired(&self) -> usize {
        self.decisions.purge_expired() + self.subjects.purge_expired()
    }
}

/// Cloneable sender side of the invalidation channel.
#[derive(Debug, Clone)]
pub struct CacheNotifier {
    tx: mpsc::UnboundedSender<CacheKind>,
}

impl CacheNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CacheKind>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues an invalidation. Returns false once the engine has shut down.
    pub fn notify(&self, kind: CacheKind) -> bool {
        self.tx.send(kind).is_ok()
    }
}
