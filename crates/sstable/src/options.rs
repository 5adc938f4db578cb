//! Options that shape how a table is opened and read.

use std::sync::Arc;
use tracing::warn;

use config::ReaderConfig;

use crate::cache::{BlockCache, LruBlockCache};
use crate::key::SliceTransform;
use crate::stats::{NoopStatistics, Statistics};

pub const DEFAULT_FILTER_POLICY_NAME: &str = "rocksdb.BuiltinBloomFilter";

/// Index layout recorded in a table's properties. The reader follows the
/// file, not the options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    BinarySearch,
    HashSearch,
}

impl IndexType {
    #[must_use]
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(IndexType::BinarySearch),
            1 => Some(IndexType::HashSearch),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            IndexType::BinarySearch => 0,
            IndexType::HashSearch => 1,
        }
    }
}

/// Maps a user key to the part of it that filters are built on, e.g. the
/// hashed component of a composite key.
pub trait KeyTransformer: Send + Sync {
    fn transform<'a>(&self, user_key: &'a [u8]) -> &'a [u8];
}

/// Filter policy the table was written with. Its name selects the filter
/// meta blocks.
#[derive(Clone)]
pub struct FilterPolicy {
    pub name: String,
    pub key_transformer: Option<Arc<dyn KeyTransformer>>,
}

impl FilterPolicy {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_transformer: None,
        }
    }

    #[must_use]
    pub fn with_key_transformer(mut self, transformer: Arc<dyn KeyTransformer>) -> Self {
        self.key_transformer = Some(transformer);
        self
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_POLICY_NAME)
    }
}

impl std::fmt::Debug for FilterPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPolicy")
            .field("name", &self.name)
            .field("key_transformer", &self.key_transformer.is_some())
            .finish()
    }
}

/// Per-table-format options, shared by every table opened with them.
#[derive(Clone)]
pub struct TableOptions {
    pub block_cache: Option<Arc<dyn BlockCache>>,
    pub block_cache_compressed: Option<Arc<dyn BlockCache>>,
    /// Serve index and filter blocks through `block_cache` instead of
    /// holding them in the reader. Requires `block_cache`.
    pub cache_index_and_filter_blocks: bool,
    pub filter_policy: Option<FilterPolicy>,
    pub whole_key_filtering: bool,
    pub hash_index_allow_collision: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            block_cache: None,
            block_cache_compressed: None,
            cache_index_and_filter_blocks: false,
            filter_policy: None,
            whole_key_filtering: true,
            hash_index_allow_collision: true,
        }
    }
}

impl TableOptions {
    /// Builds options from plain settings, creating LRU caches for non-zero
    /// capacities.
    #[must_use]
    pub fn from_config(config: &ReaderConfig) -> Self {
        let lru = |capacity: usize| -> Option<Arc<dyn BlockCache>> {
            (capacity > 0).then(|| {
                Arc::new(LruBlockCache::with_strict_capacity(
                    capacity,
                    config.strict_cache_capacity,
                )) as Arc<dyn BlockCache>
            })
        };
        let block_cache = lru(config.block_cache_capacity);
        let mut cache_index_and_filter_blocks = config.cache_index_and_filter_blocks;
        if cache_index_and_filter_blocks && block_cache.is_none() {
            warn!("caching index and filter blocks needs a block cache; keeping them in the reader");
            cache_index_and_filter_blocks = false;
        }
        Self {
            block_cache,
            block_cache_compressed: lru(config.compressed_cache_capacity),
            cache_index_and_filter_blocks,
            filter_policy: None,
            whole_key_filtering: config.whole_key_filtering,
            hash_index_allow_collision: config.hash_index_allow_collision,
        }
    }
}

impl std::fmt::Debug for TableOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableOptions")
            .field("block_cache", &self.block_cache.is_some())
            .field("block_cache_compressed", &self.block_cache_compressed.is_some())
            .field(
                "cache_index_and_filter_blocks",
                &self.cache_index_and_filter_blocks,
            )
            .field("filter_policy", &self.filter_policy)
            .field("whole_key_filtering", &self.whole_key_filtering)
            .field("hash_index_allow_collision", &self.hash_index_allow_collision)
            .finish()
    }
}

/// Options of the store the table belongs to.
#[derive(Clone)]
pub struct ReaderOptions {
    pub prefix_extractor: Option<Arc<dyn SliceTransform>>,
    pub statistics: Arc<dyn Statistics>,
    /// Build the index and filter readers while opening.
    pub prefetch_index_and_filter: bool,
    /// Ignore filters entirely for this table.
    pub skip_filters: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            prefix_extractor: None,
            statistics: Arc::new(NoopStatistics),
            prefetch_index_and_filter: true,
            skip_filters: false,
        }
    }
}

impl ReaderOptions {
    #[must_use]
    pub fn from_config(config: &ReaderConfig) -> Self {
        Self {
            prefetch_index_and_filter: config.prefetch_index_and_filter,
            ..Self::default()
        }
    }
}

/// Which storage tiers a read may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadTier {
    #[default]
    All,
    /// Only blocks already in the block cache; anything else is
    /// `Incomplete`.
    BlockCacheOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub verify_checksums: bool,
    /// Insert blocks read from the file into the block cache.
    pub fill_cache: bool,
    pub read_tier: ReadTier,
    /// Ignore the hash index and the prefix gate; seek in total order.
    pub total_order_seek: bool,
    /// Skip a table outright when its fixed-size filter rules out the seek
    /// key's hashed component.
    pub use_bloom_on_scan: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            fill_cache: true,
            read_tier: ReadTier::All,
            total_order_seek: false,
            use_bloom_on_scan: false,
        }
    }
}

impl ReadOptions {
    #[must_use]
    pub fn from_config(config: &ReaderConfig) -> Self {
        Self {
            verify_checksums: config.verify_checksums,
            ..Self::default()
        }
    }

    /// Cache-only reads.
    #[must_use]
    pub fn no_io() -> Self {
        Self {
            read_tier: ReadTier::BlockCacheOnly,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_no_io(&self) -> bool {
        self.read_tier == ReadTier::BlockCacheOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_without_cache_keeps_index_in_reader() {
        let config = ReaderConfig {
            block_cache_capacity: 0,
            cache_index_and_filter_blocks: true,
            ..ReaderConfig::default()
        };
        let opts = TableOptions::from_config(&config);
        assert!(opts.block_cache.is_none());
        assert!(!opts.cache_index_and_filter_blocks);
    }

    #[test]
    fn config_builds_both_caches() {
        let config = ReaderConfig {
            compressed_cache_capacity: 1 << 20,
            ..ReaderConfig::default()
        };
        let opts = TableOptions::from_config(&config);
        assert!(opts.block_cache.is_some());
        assert!(opts.block_cache_compressed.is_some());
        assert!(ReadOptions::from_config(&config).verify_checksums);
    }

    #[test]
    fn index_type_codes() {
        assert_eq!(IndexType::from_u32(1), Some(IndexType::HashSearch));
        assert_eq!(IndexType::from_u32(7), None);
        assert_eq!(IndexType::HashSearch.as_u32(), 1);
    }
}
