//! Index readers: map a key to the handle of the data block that may hold it.
//!
//! Every index entry's key is at or after the last key of its data block
//! and before the first key of the next one, so the first entry at or after
//! a target names the only block that can contain it.

mod hash;

pub use hash::{PrefixCandidates, PrefixIndex};

use std::sync::Arc;
use tracing::warn;

use crate::block::{read_block, Block, BlockIter};
use crate::error::Result;
use crate::file::RandomAccessFile;
use crate::format::{read_block_contents, BlockHandle, Footer};
use crate::key::{KeyComparator, SliceTransform};
use crate::properties::{
    find_meta_block, HASH_INDEX_PREFIXES_BLOCK, HASH_INDEX_PREFIXES_METADATA_BLOCK,
};

#[derive(Debug)]
enum IndexKind {
    BinarySearch,
    Hash {
        prefix_index: Option<Arc<PrefixIndex>>,
        /// Bytes of the prefixes block kept alive by an exact prefix map.
        prefixes_bytes: usize,
    },
}

/// One decoded index block plus an optional prefix lookup structure.
#[derive(Debug)]
pub struct IndexReader {
    block: Block,
    comparator: KeyComparator,
    kind: IndexKind,
}

impl IndexReader {
    /// Plain binary search over the index block at `handle`.
    pub fn binary_search(
        file: &dyn RandomAccessFile,
        footer: &Footer,
        handle: &BlockHandle,
        comparator: KeyComparator,
    ) -> Result<Self> {
        let block = read_block(file, footer, true, handle)?;
        Ok(Self {
            block,
            comparator,
            kind: IndexKind::BinarySearch,
        })
    }

    /// Index block with a prefix index built from the hash index meta
    /// blocks.
    ///
    /// Only a failure to read the index block itself is an error. If the
    /// prefix blocks are missing, unreadable or malformed the reader is
    /// still built and searches the index in total order.
    pub fn hash(
        file: &dyn RandomAccessFile,
        footer: &Footer,
        handle: &BlockHandle,
        meta_iter: &mut BlockIter,
        extractor: Arc<dyn SliceTransform>,
        allow_collision: bool,
    ) -> Result<Self> {
        let block = read_block(file, footer, true, handle)?;
        let (prefix_index, prefixes_bytes) =
            match load_prefix_index(file, footer, meta_iter, extractor, allow_collision) {
                Ok(Some((index, bytes))) => (Some(Arc::new(index)), bytes),
                Ok(None) => (None, 0),
                Err(e) => {
                    warn!(error = %e, "hash index prefixes unusable; falling back to binary search");
                    (None, 0)
                }
            };
        Ok(Self {
            block,
            comparator: KeyComparator::Internal,
            kind: IndexKind::Hash {
                prefix_index,
                prefixes_bytes,
            },
        })
    }

    /// Iterator over `(index key, encoded block handle)` entries.
    ///
    /// With `total_order_seek == false` a hash index routes seeks through
    /// its prefix index; keys of other prefixes may then be skipped.
    #[must_use]
    pub fn new_iterator(&self, total_order_seek: bool) -> BlockIter {
        let iter = self.block.iter(self.comparator);
        match &self.kind {
            IndexKind::Hash {
                prefix_index: Some(index),
                ..
            } if !total_order_seek => iter.with_prefix_index(Arc::clone(index)),
            _ => iter,
        }
    }

    #[must_use]
    pub fn has_prefix_index(&self) -> bool {
        matches!(
            self.kind,
            IndexKind::Hash {
                prefix_index: Some(_),
                ..
            }
        )
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.block.size()
    }

    #[must_use]
    pub fn usable_size(&self) -> usize {
        self.block.usable_size()
    }

    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        let extra = match &self.kind {
            IndexKind::BinarySearch => 0,
            IndexKind::Hash { prefixes_bytes, .. } => *prefixes_bytes,
        };
        self.block.approximate_memory_usage() + extra
    }
}

fn load_prefix_index(
    file: &dyn RandomAccessFile,
    footer: &Footer,
    meta_iter: &mut BlockIter,
    extractor: Arc<dyn SliceTransform>,
    allow_collision: bool,
) -> Result<Option<(PrefixIndex, usize)>> {
    let Some(prefixes_handle) = find_meta_block(meta_iter, HASH_INDEX_PREFIXES_BLOCK)? else {
        return Ok(None);
    };
    let Some(metadata_handle) = find_meta_block(meta_iter, HASH_INDEX_PREFIXES_METADATA_BLOCK)?
    else {
        return Ok(None);
    };
    let prefixes = read_block_contents(file, footer, true, &prefixes_handle, true)?.data;
    let metadata = read_block_contents(file, footer, true, &metadata_handle, true)?.data;

    if allow_collision {
        let index = PrefixIndex::bucketed(extractor, &prefixes, &metadata)?;
        Ok(Some((index, 0)))
    } else {
        let index = PrefixIndex::exact(extractor, &prefixes, &metadata)?;
        Ok(Some((index, prefixes.len())))
    }
}
