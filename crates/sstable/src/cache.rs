//! Block cache interface, an LRU implementation, cache leases and the
//! per-file cache key scheme.
//!
//! Cached values are type-erased (`Arc<dyn Any>`) so one cache can hold data
//! blocks, compressed blocks, index readers and filter readers side by side.
//! Every lookup or insert hands back a [`CacheHandle`]; dropping the handle
//! is the release, so a lease can never be released twice or leaked on an
//! early return.

use lru::LruCache;
use std::any::Any;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::coding::{put_varint64, MAX_VARINT64_LEN};
use crate::error::{Error, Result};
use crate::file::RandomAccessFile;
use crate::format::BlockHandle;

pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// Longest cache key prefix taken from a file's unique id.
pub const MAX_CACHE_KEY_PREFIX_SIZE: usize = MAX_VARINT64_LEN * 3 + 1;

/// A thread-safe key/value cache with reference-counted handles.
pub trait BlockCache: Send + Sync {
    fn lookup(&self, key: &[u8]) -> Option<CacheHandle>;

    /// Inserts `value` charged at `charge` bytes.
    ///
    /// If `key` is already present the existing entry wins and its handle is
    /// returned; the caller's copy is dropped.
    fn insert(&self, key: &[u8], value: CacheValue, charge: usize) -> Result<CacheHandle>;

    /// A fresh id, unique for the lifetime of the cache.
    fn new_id(&self) -> u64;
}

/// A lease on a cached value. Dropping it releases the lease.
pub struct CacheHandle {
    value: CacheValue,
    pins: Arc<AtomicUsize>,
}

impl CacheHandle {
    /// Creates a lease, counting it against `pins` until dropped.
    pub fn new(value: CacheValue, pins: Arc<AtomicUsize>) -> Self {
        pins.fetch_add(1, Ordering::AcqRel);
        Self { value, pins }
    }

    #[must_use]
    pub fn value(&self) -> &CacheValue {
        &self.value
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle").finish_non_exhaustive()
    }
}

struct Entry {
    value: CacheValue,
    charge: usize,
}

struct LruState {
    entries: LruCache<Vec<u8>, Entry>,
    usage: usize,
}

/// Byte-capacity LRU cache.
///
/// With `strict_capacity` an insert whose charge can never fit fails with
/// `Incomplete`; otherwise the entry is admitted and the least recently used
/// entries are evicted until usage fits again (or only the new entry is
/// left).
pub struct LruBlockCache {
    state: Mutex<LruState>,
    capacity: usize,
    strict_capacity: bool,
    next_id: AtomicU64,
    pins: Arc<AtomicUsize>,
}

impl LruBlockCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_strict_capacity(capacity, false)
    }

    #[must_use]
    pub fn with_strict_capacity(capacity: usize, strict_capacity: bool) -> Self {
        Self {
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                usage: 0,
            }),
            capacity,
            strict_capacity,
            next_id: AtomicU64::new(0),
            pins: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LruState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of the charges of resident entries.
    #[must_use]
    pub fn usage(&self) -> usize {
        self.state().usage
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks residency without touching recency.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.state().entries.contains(key)
    }

    /// Handles handed out and not yet dropped.
    #[must_use]
    pub fn pinned(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }
}

impl BlockCache for LruBlockCache {
    fn lookup(&self, key: &[u8]) -> Option<CacheHandle> {
        let mut state = self.state();
        let value = state.entries.get(key)?.value.clone();
        Some(CacheHandle::new(value, Arc::clone(&self.pins)))
    }

    fn insert(&self, key: &[u8], value: CacheValue, charge: usize) -> Result<CacheHandle> {
        let mut state = self.state();
        if let Some(existing) = state.entries.get(key) {
            let winner = existing.value.clone();
            return Ok(CacheHandle::new(winner, Arc::clone(&self.pins)));
        }
        if self.strict_capacity && charge > self.capacity {
            return Err(Error::Incomplete(
                "insert failed because the cache is full".to_string(),
            ));
        }

        state.entries.put(
            key.to_vec(),
            Entry {
                value: value.clone(),
                charge,
            },
        );
        state.usage += charge;
        while state.usage > self.capacity && state.entries.len() > 1 {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.usage -= evicted.charge,
                None => break,
            }
        }
        Ok(CacheHandle::new(value, Arc::clone(&self.pins)))
    }

    fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A value that is either owned by the caller, shared with the table, or
/// leased from a cache.
///
/// A `Cached` entry keeps its lease until the entry is dropped or its parts
/// are taken with [`CachableEntry::into_parts`].
pub enum CachableEntry<T> {
    Owned(T),
    Shared(Arc<T>),
    Cached { value: Arc<T>, handle: CacheHandle },
}

impl<T: Send + Sync + 'static> CachableEntry<T> {
    /// Wraps a cache handle, checking that it holds a `T`.
    pub fn from_handle(handle: CacheHandle) -> Result<Self> {
        let value = Arc::clone(handle.value())
            .downcast::<T>()
            .map_err(|_| Error::corruption("cache entry holds an unexpected type"))?;
        Ok(CachableEntry::Cached { value, handle })
    }
}

impl<T> CachableEntry<T> {
    #[must_use]
    pub fn is_cached(&self) -> bool {
        matches!(self, CachableEntry::Cached { .. })
    }

    /// Splits into a shared value and the lease (if any) that must outlive
    /// every use of it.
    pub fn into_parts(self) -> (Arc<T>, Option<CacheHandle>) {
        match self {
            CachableEntry::Owned(v) => (Arc::new(v), None),
            CachableEntry::Shared(v) => (v, None),
            CachableEntry::Cached { value, handle } => (value, Some(handle)),
        }
    }
}

impl<T> Deref for CachableEntry<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            CachableEntry::Owned(v) => v,
            CachableEntry::Shared(v) => v,
            CachableEntry::Cached { value, .. } => value,
        }
    }
}

/// Per-file cache key prefix.
///
/// Derived from the file's unique id when it has one that fits, otherwise
/// from a cache-issued id. Stable for the lifetime of the opened file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyPrefix(Vec<u8>);

impl CacheKeyPrefix {
    pub fn generate(cache: &dyn BlockCache, file: &dyn RandomAccessFile) -> Self {
        match file.unique_id() {
            Some(id) if !id.is_empty() && id.len() <= MAX_CACHE_KEY_PREFIX_SIZE => Self(id),
            _ => {
                let mut prefix = Vec::with_capacity(MAX_VARINT64_LEN);
                put_varint64(&mut prefix, cache.new_id());
                Self(prefix)
            }
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `prefix | varint64(handle.offset)`.
    #[must_use]
    pub fn key_for(&self, handle: &BlockHandle) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.0.len() + MAX_VARINT64_LEN);
        key.extend_from_slice(&self.0);
        put_varint64(&mut key, handle.offset);
        key
    }
}
