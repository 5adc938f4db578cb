//! Counters recorded by the read path.
//!
//! A [`Statistics`] sink is handed to the table at open time; nothing in the
//! crate keeps global counters.

use std::sync::atomic::{AtomicU64, Ordering};

const TICKER_COUNT: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ticker {
    BlockCacheDataHit,
    BlockCacheDataMiss,
    BlockCacheIndexHit,
    BlockCacheIndexMiss,
    BlockCacheFilterHit,
    BlockCacheFilterMiss,
    BlockCacheAdd,
    BlockCacheAddFailures,
    BlockCacheCompressedHit,
    BlockCacheCompressedMiss,
    BlockCacheCompressedAdd,
    BlockCacheCompressedAddFailures,
    BloomFilterChecked,
    BloomFilterUseful,
    BloomFilterPrefixChecked,
    BloomFilterPrefixUseful,
    /// Blocks read from the byte source.
    BlockReads,
}

impl Ticker {
    pub const ALL: [Ticker; TICKER_COUNT] = [
        Ticker::BlockCacheDataHit,
        Ticker::BlockCacheDataMiss,
        Ticker::BlockCacheIndexHit,
        Ticker::BlockCacheIndexMiss,
        Ticker::BlockCacheFilterHit,
        Ticker::BlockCacheFilterMiss,
        Ticker::BlockCacheAdd,
        Ticker::BlockCacheAddFailures,
        Ticker::BlockCacheCompressedHit,
        Ticker::BlockCacheCompressedMiss,
        Ticker::BlockCacheCompressedAdd,
        Ticker::BlockCacheCompressedAddFailures,
        Ticker::BloomFilterChecked,
        Ticker::BloomFilterUseful,
        Ticker::BloomFilterPrefixChecked,
        Ticker::BloomFilterPrefixUseful,
        Ticker::BlockReads,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Ticker::BlockCacheDataHit => "block.cache.data.hit",
            Ticker::BlockCacheDataMiss => "block.cache.data.miss",
            Ticker::BlockCacheIndexHit => "block.cache.index.hit",
            Ticker::BlockCacheIndexMiss => "block.cache.index.miss",
            Ticker::BlockCacheFilterHit => "block.cache.filter.hit",
            Ticker::BlockCacheFilterMiss => "block.cache.filter.miss",
            Ticker::BlockCacheAdd => "block.cache.add",
            Ticker::BlockCacheAddFailures => "block.cache.add.failures",
            Ticker::BlockCacheCompressedHit => "block.cachecompressed.hit",
            Ticker::BlockCacheCompressedMiss => "block.cachecompressed.miss",
            Ticker::BlockCacheCompressedAdd => "block.cachecompressed.add",
            Ticker::BlockCacheCompressedAddFailures => "block.cachecompressed.add.failures",
            Ticker::BloomFilterChecked => "bloom.filter.checked",
            Ticker::BloomFilterUseful => "bloom.filter.useful",
            Ticker::BloomFilterPrefixChecked => "bloom.filter.prefix.checked",
            Ticker::BloomFilterPrefixUseful => "bloom.filter.prefix.useful",
            Ticker::BlockReads => "block.reads",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

pub trait Statistics: Send + Sync {
    fn record(&self, ticker: Ticker, count: u64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatistics;

impl Statistics for NoopStatistics {
    fn record(&self, _ticker: Ticker, _count: u64) {}
}

/// Lock-free counters, one per ticker.
#[derive(Debug, Default)]
pub struct TickerCounters {
    counts: [AtomicU64; TICKER_COUNT],
}

impl TickerCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, ticker: Ticker) -> u64 {
        self.counts[ticker.slot()].load(Ordering::Relaxed)
    }

    /// `(name, count)` for every ticker.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        Ticker::ALL.iter().map(|t| (t.name(), self.get(*t))).collect()
    }
}

impl Statistics for TickerCounters {
    fn record(&self, ticker: Ticker, count: u64) {
        self.counts[ticker.slot()].fetch_add(count, Ordering::Relaxed);
    }
}
