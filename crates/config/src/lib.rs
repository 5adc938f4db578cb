//! # Config - table reader settings
//!
//! Plain-data settings for opening and reading table files. The runtime
//! pieces (caches, filter policy, prefix extractor) are assembled from these
//! by `sstable::TableOptions::from_config`.
//!
//! ## Environment
//!
//! ```text
//! SST_BLOCK_CACHE_MB        Uncompressed block cache size in MiB  (default: 64, 0 = disabled)
//! SST_COMPRESSED_CACHE_MB   Compressed block cache size in MiB    (default: 0 = disabled)
//! SST_CACHE_INDEX_FILTER    Serve index/filter through the cache  (default: "false")
//! SST_PREFETCH_INDEX_FILTER Load index/filter at open             (default: "true")
//! SST_VERIFY_CHECKSUMS      Verify block checksums on reads       (default: "true")
//! SST_WHOLE_KEY_FILTERING   Probe filters with whole keys         (default: "true")
//! SST_HASH_ALLOW_COLLISION  Collision-tolerant hash index         (default: "true")
//! SST_STRICT_CACHE_CAPACITY Reject inserts that cannot fit        (default: "false")
//! ```
//!
//! Values that fail to parse fall back to the default with a warning.

use std::str::FromStr;

const MIB: usize = 1024 * 1024;

/// Settings consumed when a table reader is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Byte capacity of the uncompressed block cache; `0` disables it.
    pub block_cache_capacity: usize,
    /// Byte capacity of the compressed block cache; `0` disables it.
    pub compressed_cache_capacity: usize,
    /// Route index and filter blocks through the block cache instead of
    /// holding them in the reader.
    pub cache_index_and_filter_blocks: bool,
    pub prefetch_index_and_filter: bool,
    pub verify_checksums: bool,
    pub whole_key_filtering: bool,
    pub hash_index_allow_collision: bool,
    /// When set, a cache insert whose charge cannot fit fails instead of
    /// evicting pinned capacity.
    pub strict_cache_capacity: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            block_cache_capacity: 64 * MIB,
            compressed_cache_capacity: 0,
            cache_index_and_filter_blocks: false,
            prefetch_index_and_filter: true,
            verify_checksums: true,
            whole_key_filtering: true,
            hash_index_allow_collision: true,
            strict_cache_capacity: false,
        }
    }
}

impl ReaderConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, falling back to the
    /// defaults for absent or unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        Self {
            block_cache_capacity: parse_mib_or(&lookup, "SST_BLOCK_CACHE_MB", d.block_cache_capacity),
            compressed_cache_capacity: parse_mib_or(
                &lookup,
                "SST_COMPRESSED_CACHE_MB",
                d.compressed_cache_capacity,
            ),
            cache_index_and_filter_blocks: parse_or(
                &lookup,
                "SST_CACHE_INDEX_FILTER",
                d.cache_index_and_filter_blocks,
            ),
            prefetch_index_and_filter: parse_or(
                &lookup,
                "SST_PREFETCH_INDEX_FILTER",
                d.prefetch_index_and_filter,
            ),
            verify_checksums: parse_or(&lookup, "SST_VERIFY_CHECKSUMS", d.verify_checksums),
            whole_key_filtering: parse_or(&lookup, "SST_WHOLE_KEY_FILTERING", d.whole_key_filtering),
            hash_index_allow_collision: parse_or(
                &lookup,
                "SST_HASH_ALLOW_COLLISION",
                d.hash_index_allow_collision,
            ),
            strict_cache_capacity: parse_or(
                &lookup,
                "SST_STRICT_CACHE_CAPACITY",
                d.strict_cache_capacity,
            ),
        }
    }
}

/// A MiB count converted to bytes; counts too large for `usize` fall back
/// to `default` (already in bytes).
fn parse_mib_or<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    let mib = parse_or(lookup, key, default / MIB);
    mib.checked_mul(MIB).unwrap_or_else(|| {
        tracing::warn!(key, mib, default, "setting too large, using default");
        default
    })
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, ?default, "unparsable setting, using default");
                default
            }
        },
    }
}
