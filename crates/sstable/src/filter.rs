//! Filter block readers.
//!
//! A filter answers "may this key (or prefix) be in the table". `false` is
//! definite; `true` may be a false positive.
//!
//! Three on-disk layouts are understood:
//!
//! - block-based: one bloom filter per 2^base_lg bytes of data-block offsets
//!   ```text
//!   [filter 0]..[filter n-1][offset of filter i: u32 LE]*[array offset: u32 LE][base_lg: u8]
//!   ```
//! - full: one bloom filter over every key of the table
//! - fixed-size: many small bloom filters, each covering a run of filter
//!   keys and located through a separate filter index

use bloom::BloomFilter;
use bytes::Bytes;
use std::sync::Arc;

use crate::coding::decode_fixed32;
use crate::error::{Error, Result};
use crate::key::SliceTransform;

/// Array offset plus `base_lg`.
const BLOCK_TRAILER_LEN: usize = 5;

/// Filter settings derived from the table options and properties.
#[derive(Clone, Default)]
pub struct FilterSettings {
    /// Set only when prefix filtering is enabled for the table.
    pub prefix_extractor: Option<Arc<dyn SliceTransform>>,
    pub whole_key_filtering: bool,
}

#[derive(Debug)]
struct BlockBasedFilter {
    data: Bytes,
    /// Start of the offset array; `0` with `num == 0` for a malformed block.
    offsets: usize,
    num: usize,
    base_lg: u8,
}

impl BlockBasedFilter {
    fn new(data: Bytes) -> Self {
        let n = data.len();
        let mut filter = Self {
            data,
            offsets: 0,
            num: 0,
            base_lg: 0,
        };
        if n < BLOCK_TRAILER_LEN {
            return filter;
        }
        let array_offset =
            decode_fixed32(&filter.data[n - BLOCK_TRAILER_LEN..]).unwrap_or(u32::MAX) as usize;
        if array_offset > n - BLOCK_TRAILER_LEN {
            return filter;
        }
        filter.base_lg = filter.data[n - 1];
        filter.offsets = array_offset;
        filter.num = (n - BLOCK_TRAILER_LEN - array_offset) / 4;
        filter
    }

    fn may_match(&self, entry: &[u8], block_offset: u64) -> bool {
        let Some(index) = block_offset.checked_shr(u32::from(self.base_lg)) else {
            return true;
        };
        let Ok(index) = usize::try_from(index) else {
            return true;
        };
        if index >= self.num {
            return true;
        }
        let pos = self.offsets + index * 4;
        let start = decode_fixed32(&self.data[pos..]).map(|v| v as usize);
        let limit = decode_fixed32(&self.data[pos + 4..]).map(|v| v as usize);
        let (Some(start), Some(limit)) = (start, limit) else {
            return true;
        };
        if start == limit {
            return false;
        }
        if start > limit || limit > self.offsets {
            return true;
        }
        match BloomFilter::from_bytes(&self.data[start..limit]) {
            Ok(bloom) => bloom.may_contain(entry),
            Err(_) => true,
        }
    }
}

/// Whole-table bloom filter. An empty block matches everything.
#[derive(Debug)]
struct WholeFilter {
    bloom: Option<BloomFilter>,
    size: usize,
}

impl WholeFilter {
    fn new(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self {
                bloom: None,
                size: 0,
            });
        }
        let bloom = BloomFilter::from_bytes(data)
            .map_err(|e| Error::corruption(format!("bad filter block: {}", e)))?;
        Ok(Self {
            size: bloom.approximate_memory_usage(),
            bloom: Some(bloom),
        })
    }

    fn may_match(&self, entry: &[u8]) -> bool {
        self.bloom.as_ref().map_or(true, |b| b.may_contain(entry))
    }
}

#[derive(Debug)]
enum Kind {
    BlockBased(BlockBasedFilter),
    Full(WholeFilter),
    FixedSize(WholeFilter),
    NotMatching,
}

/// A decoded filter block of one of the supported layouts.
pub struct FilterReader {
    kind: Kind,
    settings: FilterSettings,
}

impl FilterReader {
    pub fn block_based(settings: FilterSettings, data: Bytes) -> Self {
        Self {
            kind: Kind::BlockBased(BlockBasedFilter::new(data)),
            settings,
        }
    }

    pub fn full(settings: FilterSettings, data: &[u8]) -> Result<Self> {
        Ok(Self {
            kind: Kind::Full(WholeFilter::new(data)?),
            settings,
        })
    }

    /// One fixed-size filter segment.
    pub fn fixed_size(settings: FilterSettings, data: &[u8]) -> Result<Self> {
        Ok(Self {
            kind: Kind::FixedSize(WholeFilter::new(data)?),
            settings,
        })
    }

    /// Rules out every key and prefix.
    #[must_use]
    pub fn not_matching() -> Self {
        Self {
            kind: Kind::NotMatching,
            settings: FilterSettings::default(),
        }
    }

    #[must_use]
    pub fn is_block_based(&self) -> bool {
        matches!(self.kind, Kind::BlockBased(_))
    }

    /// `block_offset` selects the sub-filter of a block-based filter and is
    /// ignored by the others. A block-based filter without an offset cannot
    /// rule anything out.
    #[must_use]
    pub fn key_may_match(&self, key: &[u8], block_offset: Option<u64>) -> bool {
        if let Kind::NotMatching = self.kind {
            return false;
        }
        if !self.settings.whole_key_filtering {
            return true;
        }
        self.may_match(key, block_offset)
    }

    #[must_use]
    pub fn prefix_may_match(&self, prefix: &[u8], block_offset: Option<u64>) -> bool {
        if let Kind::NotMatching = self.kind {
            return false;
        }
        if self.settings.prefix_extractor.is_none() {
            return true;
        }
        self.may_match(prefix, block_offset)
    }

    fn may_match(&self, entry: &[u8], block_offset: Option<u64>) -> bool {
        match &self.kind {
            Kind::BlockBased(f) => block_offset.map_or(true, |off| f.may_match(entry, off)),
            Kind::Full(f) | Kind::FixedSize(f) => f.may_match(entry),
            Kind::NotMatching => false,
        }
    }

    /// Prefix extractor in effect, if prefix filtering is enabled.
    #[must_use]
    pub fn prefix_extractor(&self) -> Option<&Arc<dyn SliceTransform>> {
        self.settings.prefix_extractor.as_ref()
    }

    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        match &self.kind {
            Kind::BlockBased(f) => f.data.len(),
            Kind::Full(f) | Kind::FixedSize(f) => f.size,
            Kind::NotMatching => 0,
        }
    }

    /// Human-readable summary used by table dumps.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.kind {
            Kind::BlockBased(f) => {
                let mut out = format!(
                    "block-based filter: {} filters, base_lg {}\n",
                    f.num, f.base_lg
                );
                for i in 0..f.num {
                    let pos = f.offsets + i * 4;
                    let start = decode_fixed32(&f.data[pos..]).unwrap_or(0);
                    let limit = decode_fixed32(&f.data[pos + 4..]).unwrap_or(0);
                    out.push_str(&format!(
                        "  filter block # {}: {} bytes\n",
                        i + 1,
                        limit.saturating_sub(start)
                    ));
                }
                out
            }
            Kind::Full(f) | Kind::FixedSize(f) => {
                let label = if matches!(self.kind, Kind::Full(_)) {
                    "full filter"
                } else {
                    "fixed-size filter"
                };
                match &f.bloom {
                    Some(b) => format!(
                        "{}: {} bits, {} probes\n",
                        label,
                        b.num_bits(),
                        b.num_hashes()
                    ),
                    None => format!("{}: empty\n", label),
                }
            }
            Kind::NotMatching => "not-matching filter\n".to_string(),
        }
    }
}

impl std::fmt::Debug for FilterReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterReader")
            .field("kind", &self.kind)
            .field("whole_key_filtering", &self.settings.whole_key_filtering)
            .field("prefix_filtering", &self.settings.prefix_extractor.is_some())
            .finish()
    }
}
