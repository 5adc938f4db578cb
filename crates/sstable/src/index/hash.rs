//! Prefix lookup structures layered over a hash-search index block.
//!
//! Both are built from two meta blocks written next to the index:
//!
//! ```text
//! prefixes: prefix_0 | prefix_1 | ...            (concatenated, no framing)
//! metadata: [len: varint32][first_restart: varint32][num_blocks: varint32]*
//! ```
//!
//! Each metadata record says that the index restart blocks
//! `first_restart .. first_restart + num_blocks` hold the keys of one prefix.

use std::collections::HashMap;
use std::sync::Arc;
use xxhash_rust::xxh32::xxh32;

use crate::coding::get_varint32;
use crate::error::{Error, Result};
use crate::key::{extract_user_key, SliceTransform};

/// Where a prefix seek should look in the index block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixCandidates<'a> {
    /// A contiguous run of restart blocks; `count == 0` means the prefix is
    /// not in the table.
    Range { first: u32, count: u32 },
    /// Sorted restart block ids of a hash bucket. Blocks of other prefixes
    /// may be mixed in.
    Blocks(&'a [u32]),
}

#[derive(Debug)]
enum Lookup {
    /// Exact prefix -> (first restart, restart count).
    Exact(HashMap<Vec<u8>, (u32, u32)>),
    /// Collision-tolerant buckets of restart block ids.
    Buckets(Vec<Vec<u32>>),
}

/// Auxiliary prefix index attached to index block iterators.
pub struct PrefixIndex {
    extractor: Arc<dyn SliceTransform>,
    lookup: Lookup,
}

struct PrefixRecord<'a> {
    prefix: &'a [u8],
    first_restart: u32,
    num_blocks: u32,
}

fn parse_records<'a>(prefixes: &'a [u8], metadata: &[u8]) -> Result<Vec<PrefixRecord<'a>>> {
    let bad = || Error::corruption("bad hash index prefix metadata");
    let mut records = Vec::new();
    let mut meta = metadata;
    let mut pos = 0usize;
    while !meta.is_empty() {
        let (len, n1) = get_varint32(meta).ok_or_else(bad)?;
        let (first_restart, n2) = get_varint32(&meta[n1..]).ok_or_else(bad)?;
        let (num_blocks, n3) = get_varint32(&meta[n1 + n2..]).ok_or_else(bad)?;
        meta = &meta[n1 + n2 + n3..];

        let end = pos + len as usize;
        if end > prefixes.len() {
            return Err(bad());
        }
        records.push(PrefixRecord {
            prefix: &prefixes[pos..end],
            first_restart,
            num_blocks,
        });
        pos = end;
    }
    if pos != prefixes.len() {
        return Err(Error::corruption("hash index prefixes left unconsumed"));
    }
    Ok(records)
}

fn bucket_of(prefix: &[u8], num_buckets: usize) -> usize {
    xxh32(prefix, 0) as usize % num_buckets
}

impl PrefixIndex {
    /// Exact prefix map. Duplicate prefixes are `Corruption`.
    pub fn exact(
        extractor: Arc<dyn SliceTransform>,
        prefixes: &[u8],
        metadata: &[u8],
    ) -> Result<Self> {
        let records = parse_records(prefixes, metadata)?;
        let mut map = HashMap::with_capacity(records.len());
        for r in records {
            if map
                .insert(r.prefix.to_vec(), (r.first_restart, r.num_blocks))
                .is_some()
            {
                return Err(Error::corruption("duplicate prefix in hash index"));
            }
        }
        Ok(Self {
            extractor,
            lookup: Lookup::Exact(map),
        })
    }

    /// Hash buckets of block ids, one bucket per prefix. Prefixes that
    /// collide share a bucket, so lookups may return extra candidates.
    pub fn bucketed(
        extractor: Arc<dyn SliceTransform>,
        prefixes: &[u8],
        metadata: &[u8],
    ) -> Result<Self> {
        let records = parse_records(prefixes, metadata)?;
        let num_buckets = records.len().max(1);
        let mut buckets = vec![Vec::new(); num_buckets];
        for r in &records {
            let bucket = &mut buckets[bucket_of(r.prefix, num_buckets)];
            let end = r
                .first_restart
                .checked_add(r.num_blocks)
                .ok_or_else(|| Error::corruption("hash index block range overflows"))?;
            bucket.extend(r.first_restart..end);
        }
        for bucket in &mut buckets {
            bucket.sort_unstable();
            bucket.dedup();
        }
        Ok(Self {
            extractor,
            lookup: Lookup::Buckets(buckets),
        })
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        matches!(self.lookup, Lookup::Exact(_))
    }

    /// Candidate restart blocks for `internal_key`, or `None` when the key is
    /// outside the extractor's domain and a total-order search is needed.
    #[must_use]
    pub fn candidates(&self, internal_key: &[u8]) -> Option<PrefixCandidates<'_>> {
        let user_key = extract_user_key(internal_key);
        if !self.extractor.in_domain(user_key) {
            return None;
        }
        let prefix = self.extractor.transform(user_key);
        Some(match &self.lookup {
            Lookup::Exact(map) => match map.get(prefix) {
                Some(&(first, count)) => PrefixCandidates::Range { first, count },
                None => PrefixCandidates::Range { first: 0, count: 0 },
            },
            Lookup::Buckets(buckets) => {
                PrefixCandidates::Blocks(&buckets[bucket_of(prefix, buckets.len())])
            }
        })
    }

    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        match &self.lookup {
            Lookup::Exact(map) => map
                .keys()
                .map(|k| k.len() + std::mem::size_of::<(Vec<u8>, (u32, u32))>())
                .sum(),
            Lookup::Buckets(buckets) => buckets
                .iter()
                .map(|b| b.len() * 4 + std::mem::size_of::<Vec<u32>>())
                .sum(),
        }
    }
}

impl std::fmt::Debug for PrefixIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixIndex")
            .field("extractor", &self.extractor.name())
            .field("lookup", &self.lookup)
            .finish()
    }
}
