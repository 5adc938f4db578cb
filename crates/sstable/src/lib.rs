//! # sstable - block-based table reader
//!
//! Read path for immutable, block-structured sorted tables in the RocksDB
//! block-based table format: point lookups, ordered iteration, prefix
//! seeks, bloom filters and a shared block cache.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS                                                    │
//! │   sorted internal keys with restart points, each block         │
//! │   followed by a 5-byte trailer: compression (u8) | checksum    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ META BLOCKS                                                    │
//! │   filter block (block-based, full or fixed-size index)         │
//! │   properties block                                             │
//! │   hash index prefixes / metadata (hash-search indexes only)    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ META-INDEX BLOCK   meta block name -> block handle             │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK        last key of data block -> block handle      │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER                                                         │
//! │   legacy (48 B): metaindex | index | padding | magic           │
//! │   current (53 B): checksum type | metaindex | index | padding  │
//! │                   | version (u32) | magic                      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Block handles are `varint64 offset | varint64 size`. All fixed-width
//! integers are little-endian.
//!
//! ## Reading
//!
//! [`TableReader::open`] parses the footer and the meta-index and, unless
//! told otherwise, builds the index and filter up front. Lookups go through
//! [`TableReader::get`] with a [`GetContext`]; scans through
//! [`TableReader::new_iterator`]. Blocks are cached in a [`BlockCache`]
//! shared by every table that was opened with it.

mod block;
mod cache;
mod coding;
mod compress;
mod error;
mod file;
mod filter;
mod format;
mod get_context;
mod index;
mod iterator;
mod key;
mod options;
mod properties;
mod stats;
mod table;

pub use block::{Block, BlockIter};
pub use cache::{
    BlockCache, CachableEntry, CacheHandle, CacheKeyPrefix, CacheValue, LruBlockCache,
    MAX_CACHE_KEY_PREFIX_SIZE,
};
pub use compress::CompressionType;
pub use error::{Error, Result};
pub use file::{FsFile, MemFile, RandomAccessFile};
pub use filter::{FilterReader, FilterSettings};
pub use format::{
    BlockContents, BlockHandle, ChecksumType, Footer, BLOCK_TRAILER_SIZE, FOOTER_SIZE,
    LEGACY_FOOTER_SIZE, LEGACY_TABLE_MAGIC, MAX_SUPPORTED_VERSION, TABLE_MAGIC,
};
pub use get_context::{GetContext, LookupContext, LookupState};
pub use index::{IndexReader, PrefixIndex};
pub use iterator::{
    BlockSource, FilterAwareIterator, InternalIterator, PartitionFilter, TwoLevelIterator,
};
pub use key::{
    extract_user_key, make_internal_key, parse_internal_key, FixedPrefixTransform,
    KeyComparator, ParsedInternalKey, SliceTransform, ValueType, MAX_SEQUENCE_NUMBER,
};
pub use options::{
    FilterPolicy, IndexType, KeyTransformer, ReadOptions, ReadTier, ReaderOptions,
    TableOptions, DEFAULT_FILTER_POLICY_NAME,
};
pub use properties::{names as property_names, TableProperties};
pub use stats::{NoopStatistics, Statistics, Ticker, TickerCounters};
pub use table::{FilterType, TableReader};

#[cfg(test)]
mod tests;
