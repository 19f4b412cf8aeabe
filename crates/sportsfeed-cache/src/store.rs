//! The bounded key-value store underneath every cache.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};

use moka::notification::RemovalCause;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;

use crate::config::StoreConfig;
use crate::error::CacheError;
use crate::types::CacheName;

/// A thread-safe in-memory store with sliding expiration and an optional capacity bound.
///
/// Values are meant to be cheap to clone (usually an `Arc` around an immutable cache item). All
/// mutation goes through [`add`](Self::add), [`update`](Self::update) and [`remove`](Self::remove),
/// each of which is atomic for a single key.
///
/// Evictions of any kind, except for an item being replaced by a newer version of itself, are
/// logged at debug level together with the evicted key.
///
/// After [`dispose`](Self::dispose), all mutating calls fail with [`CacheError::Disposed`] and
/// the read accessors see an empty store.
pub struct CacheStore<K, V> {
    name: CacheName,
    inner: Cache<K, V>,
    disposed: AtomicBool,
}

impl<K, V> fmt::Debug for CacheStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("name", &self.name)
            .field("items", &self.inner.entry_count())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, V> CacheStore<K, V>
where
    K: Hash + Eq + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: CacheName, config: StoreConfig) -> Self {
        let mut builder = Cache::<K, V>::builder()
            .name(name.as_ref())
            .eviction_listener(move |key, _value, cause| {
                if matches!(cause, RemovalCause::Replaced) {
                    return;
                }
                tracing::debug!(cache = %name, %key, ?cause, "{name}: evicted cache item");
                metric!(counter("caches.evicted") += 1, "cache" => name.as_ref());
            });

        // a zero sliding expiration means the items never expire
        if !config.sliding_expiration.is_zero() {
            builder = builder.time_to_idle(config.sliding_expiration);
        }
        if let Some(capacity) = config.max_capacity {
            builder = builder.max_capacity(capacity);
        }

        Self {
            name,
            inner: builder.build(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> CacheName {
        self.name
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_not_disposed(&self) -> Result<(), CacheError> {
        if self.is_disposed() {
            return Err(CacheError::Disposed(self.name));
        }
        Ok(())
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn add(&self, key: K, value: V) -> Result<(), CacheError> {
        self.ensure_not_disposed()?;
        self.inner.insert(key.clone(), value);

        // a concurrent `dispose` may have cleared the store before our insert landed
        if self.is_disposed() {
            self.inner.invalidate(&key);
            return Err(CacheError::Disposed(self.name));
        }
        Ok(())
    }

    /// Atomically computes a new value for `key` from the current one.
    ///
    /// Returning `None` from `f` leaves the store untouched. Returns the value stored for `key`
    /// after the update.
    pub fn update<F>(&self, key: K, f: F) -> Result<Option<V>, CacheError>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        self.ensure_not_disposed()?;
        let result = self.inner.entry(key.clone()).and_compute_with(|entry| {
            match f(entry.as_ref().map(|entry| entry.value())) {
                Some(value) => Op::Put(value),
                None => Op::Nop,
            }
        });

        if self.is_disposed() {
            self.inner.invalidate(&key);
            return Err(CacheError::Disposed(self.name));
        }

        Ok(match result {
            CompResult::Inserted(entry)
            | CompResult::ReplacedWith(entry)
            | CompResult::Unchanged(entry) => Some(entry.into_value()),
            CompResult::Removed(_) | CompResult::StillNone(_) => None,
        })
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if self.is_disposed() {
            return None;
        }
        self.inner.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        !self.is_disposed() && self.inner.contains_key(key)
    }

    /// Removes `key`, returning the removed value if there was one.
    pub fn remove(&self, key: &K) -> Result<Option<V>, CacheError> {
        self.ensure_not_disposed()?;
        Ok(self.inner.remove(key))
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.iter().map(|(key, _)| K::clone(&key)).collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.iter().map(|(_, value)| value).collect()
    }

    /// The number of stored items.
    pub fn count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    /// The weighted size of all stored items.
    pub fn size(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.weighted_size()
    }

    /// Runs pending maintenance, such as expiring stale items.
    pub fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks();
    }

    /// Drops all items and rejects any further mutation.
    ///
    /// Calling this more than once is harmless.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(cache = %self.name, "disposing cache store");
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }
}
