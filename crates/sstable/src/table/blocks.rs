//! Data block access through the two cache tiers.

use std::sync::Arc;
use tracing::debug;

use super::{FilterType, Rep};
use crate::block::{Block, BlockIter};
use crate::cache::{BlockCache, CachableEntry};
use crate::compress::{uncompress, CompressionType};
use crate::error::{Error, Result};
use crate::format::{BlockContents, BlockHandle};
use crate::iterator::{BlockSource, PartitionFilter};
use crate::key::KeyComparator;
use crate::options::ReadOptions;
use crate::stats::Ticker;

impl Rep {
    /// Iterator over the data block named by an encoded index value.
    /// Failures are reported through the iterator's status.
    pub(crate) fn new_data_block_iter(
        &self,
        read_options: &ReadOptions,
        index_value: &[u8],
    ) -> BlockIter {
        let handle = match BlockHandle::decode(index_value) {
            Ok(handle) => handle,
            Err(e) => return BlockIter::error(e),
        };
        match self.data_block(read_options, &handle) {
            Ok(entry) => {
                let (block, lease) = entry.into_parts();
                block.iter(KeyComparator::Internal).pinned(lease)
            }
            Err(e) => BlockIter::error(e),
        }
    }

    /// Fetches a data block: primary cache, then compressed cache, then the
    /// file. Blocks read from the file are cached when `fill_cache` is set.
    pub(crate) fn data_block(
        &self,
        read_options: &ReadOptions,
        handle: &BlockHandle,
    ) -> Result<CachableEntry<Block>> {
        let cache = self.options.block_cache.as_deref();
        let compressed_cache = self.options.block_cache_compressed.as_deref();

        if cache.is_some() || compressed_cache.is_some() {
            let key = self.data.cache_key_prefix.as_ref().map(|p| p.key_for(handle));
            let compressed_key = self
                .data
                .compressed_cache_key_prefix
                .as_ref()
                .map(|p| p.key_for(handle));

            if let Some(entry) = self.get_data_block_from_cache(
                key.as_deref(),
                compressed_key.as_deref(),
                read_options,
            )? {
                return Ok(entry);
            }
            if !read_options.is_no_io() && read_options.fill_cache {
                let contents = self.read_contents(
                    self.data.file.as_ref(),
                    handle,
                    read_options.verify_checksums,
                    compressed_cache.is_none(),
                )?;
                return self.put_data_block_to_cache(
                    key.as_deref(),
                    compressed_key.as_deref(),
                    read_options,
                    contents,
                );
            }
        }

        if read_options.is_no_io() {
            return Err(Error::no_io());
        }
        let contents = self.read_contents(
            self.data.file.as_ref(),
            handle,
            read_options.verify_checksums,
            true,
        )?;
        Ok(CachableEntry::Owned(Block::new(contents.data)?))
    }

    /// Looks the block up in the primary cache, then in the compressed
    /// cache. A compressed hit is decompressed and promoted into the primary
    /// cache when `fill_cache` is set.
    pub(crate) fn get_data_block_from_cache(
        &self,
        key: Option<&[u8]>,
        compressed_key: Option<&[u8]>,
        read_options: &ReadOptions,
    ) -> Result<Option<CachableEntry<Block>>> {
        let cache = self.options.block_cache.as_deref();
        if let (Some(cache), Some(key)) = (cache, key) {
            if let Some(handle) = self.lookup_cache(
                cache,
                key,
                Ticker::BlockCacheDataMiss,
                Ticker::BlockCacheDataHit,
            ) {
                return CachableEntry::from_handle(handle).map(Some);
            }
        }

        let (Some(compressed_cache), Some(compressed_key)) =
            (self.options.block_cache_compressed.as_deref(), compressed_key)
        else {
            return Ok(None);
        };
        let Some(handle) = compressed_cache.lookup(compressed_key) else {
            self.record(Ticker::BlockCacheCompressedMiss);
            return Ok(None);
        };
        self.record(Ticker::BlockCacheCompressedHit);
        let data = {
            let contents = handle
                .value()
                .downcast_ref::<BlockContents>()
                .ok_or_else(|| Error::corruption("compressed cache entry holds an unexpected type"))?;
            uncompress(&contents.data, contents.compression, self.footer.version())?
        };
        drop(handle);

        let block = Block::new(data)?;
        self.insert_data_block(cache, key, read_options, block).map(Some)
    }

    /// Caches a block just read from the file. A compressed block goes to
    /// the compressed cache as-is and to the primary cache decompressed.
    pub(crate) fn put_data_block_to_cache(
        &self,
        key: Option<&[u8]>,
        compressed_key: Option<&[u8]>,
        read_options: &ReadOptions,
        contents: BlockContents,
    ) -> Result<CachableEntry<Block>> {
        let data = if contents.compression == CompressionType::None {
            contents.data
        } else {
            if let (Some(compressed_cache), Some(compressed_key)) =
                (self.options.block_cache_compressed.as_deref(), compressed_key)
            {
                let charge = contents.data.len();
                match compressed_cache.insert(compressed_key, Arc::new(contents.clone()), charge) {
                    Ok(_) => self.record(Ticker::BlockCacheCompressedAdd),
                    Err(_) => self.record(Ticker::BlockCacheCompressedAddFailures),
                }
            }
            uncompress(&contents.data, contents.compression, self.footer.version())?
        };
        let block = Block::new(data)?;
        self.insert_data_block(self.options.block_cache.as_deref(), key, read_options, block)
    }

    /// Inserts a decoded block into the primary cache. If it cannot be
    /// cached the block is handed back uncached.
    fn insert_data_block(
        &self,
        cache: Option<&dyn BlockCache>,
        key: Option<&[u8]>,
        read_options: &ReadOptions,
        block: Block,
    ) -> Result<CachableEntry<Block>> {
        let (Some(cache), Some(key), true) = (cache, key, read_options.fill_cache) else {
            return Ok(CachableEntry::Owned(block));
        };
        match cache.insert(key, Arc::new(block.clone()), block.usable_size()) {
            Ok(handle) => {
                self.record(Ticker::BlockCacheAdd);
                CachableEntry::from_handle(handle)
            }
            Err(e) => {
                self.record(Ticker::BlockCacheAddFailures);
                debug!(error = %e, "data block not cached");
                Ok(CachableEntry::Owned(block))
            }
        }
    }
}

/// Opens data blocks for a [`crate::iterator::TwoLevelIterator`] and gates
/// seeks on the table's prefix filter.
pub(crate) struct DataBlockSource {
    pub(crate) rep: Arc<Rep>,
    pub(crate) read_options: ReadOptions,
    pub(crate) skip_filters: bool,
}

impl BlockSource for DataBlockSource {
    type Iter = BlockIter;

    fn new_block_iter(&mut self, index_value: &[u8]) -> BlockIter {
        self.rep.new_data_block_iter(&self.read_options, index_value)
    }

    fn prefix_may_match(&mut self, target: &[u8]) -> bool {
        if self.read_options.total_order_seek || self.skip_filters {
            return true;
        }
        self.rep.prefix_may_match(target)
    }

    fn check_prefix_may_match(&self) -> bool {
        self.rep.reader_options.prefix_extractor.is_some()
    }
}

/// Rules out a seek when the table's fixed-size filter has no entry for
/// the seek key's filter key.
pub(crate) struct TablePartitionFilter {
    pub(crate) rep: Arc<Rep>,
    pub(crate) read_options: ReadOptions,
    pub(crate) skip_filters: bool,
}

impl PartitionFilter for TablePartitionFilter {
    fn may_contain_partition(&mut self, internal_key: &[u8]) -> bool {
        if self.skip_filters || self.rep.filter_type != FilterType::FixedSize {
            return true;
        }
        let filter_key = self.rep.filter_key(internal_key);
        let filter = self
            .rep
            .get_filter(self.read_options.is_no_io(), Some(filter_key));
        let may_match = self
            .rep
            .non_block_based_filter_key_may_match(filter.as_deref(), filter_key);
        if !may_match {
            self.rep.record(Ticker::BloomFilterUseful);
        }
        may_match
    }
}
