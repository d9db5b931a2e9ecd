//! Owned TTL cache with per-key request coalescing.
//!
//! Concurrent `get_or_fetch` calls for the same key share one pending
//! operation: the first caller runs the fetch, the others await its result.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

type Pending<V> = Arc<OnceCell<V>>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    pending: HashMap<K, Pending<V>>,
    // bumped by clear(); results of fetches started before are dropped
    generation: u64,
}

pub struct CoalescingCache<K, V> {
    ttl: Option<Duration>,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> CoalescingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `ttl = None` keeps entries until `invalidate` or `clear`.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                pending: HashMap::new(),
                generation: 0,
            }),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry<V>) -> bool {
        match self.ttl {
            Some(ttl) => entry.stored_at.elapsed() < ttl,
            None => true,
        }
    }

    /// Returns the cached value if still fresh. An expired entry is evicted.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        let fresh = state.entries.get(key).map(|entry| self.is_fresh(entry))?;
        if fresh {
            state.entries.get(key).map(|entry| entry.value.clone())
        } else {
            state.entries.remove(key);
            None
        }
    }

    /// Returns the cached value, or the result of `fetch`.
    ///
    /// With `force`, any cached value is evicted first. If a fetch for `key`
    /// is already pending, its result is awaited instead of calling `fetch`.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, force: bool, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let (cell, generation) = {
            let mut state = self.lock();

            if let Some(entry) = state.entries.get(&key) {
                if !force && self.is_fresh(entry) {
                    return entry.value.clone();
                }
                state.entries.remove(&key);
            }

            let cell = state
                .pending
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();
            (cell, state.generation)
        };

        let key_ref = &key;
        let cell_ref = &cell;
        cell.get_or_init(|| async move {
            let value = fetch().await;
            self.complete(key_ref, cell_ref, generation, &value);
            value
        })
        .await
        .clone()
    }

    fn complete(&self, key: &K, cell: &Pending<V>, generation: u64, value: &V) {
        let mut state = self.lock();

        if state
            .pending
            .get(key)
            .is_some_and(|pending| Arc::ptr_eq(pending, cell))
        {
            state.pending.remove(key);
        }

        if state.generation == generation {
            state.entries.insert(
                key.clone(),
                CacheEntry {
                    value: value.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.lock().entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.lock().entries.remove(key);
    }

    /// Drops every entry and pending operation. Fetches already running are
    /// not aborted; their callers still get the value but it is not stored.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.pending.clear();
        state.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}
