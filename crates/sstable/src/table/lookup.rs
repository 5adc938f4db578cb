//! Point lookups, iterators and the prefix gate.

use std::cmp::Ordering;
use std::sync::Arc;

use super::blocks::{DataBlockSource, TablePartitionFilter};
use super::{FilterType, Rep, TableReader};
use crate::error::{Error, Result};
use crate::format::BlockHandle;
use crate::get_context::GetContext;
use crate::iterator::{FilterAwareIterator, InternalIterator, TwoLevelIterator};
use crate::key::{
    extract_user_key, make_internal_key, parse_internal_key, KeyComparator, ValueType,
    MAX_SEQUENCE_NUMBER,
};
use crate::options::ReadOptions;
use crate::stats::Ticker;

impl TableReader {
    /// Point lookup of `internal_key`.
    ///
    /// A whole-table or fixed-size filter that rules the key out ends the
    /// lookup before any index or data block is touched. Otherwise every
    /// candidate block from the index is probed with a block-based filter
    /// (if any), then scanned from `internal_key`, feeding entries to `ctx`
    /// until it asks to stop.
    ///
    /// Under a cache-only read a block that is not cached ends the lookup
    /// with [`GetContext::mark_key_may_exist`] instead of an error.
    ///
    /// # Errors
    ///
    /// Block read or decode failures, and `Corruption` for an entry whose
    /// key cannot be parsed.
    pub fn get(
        &self,
        read_options: &ReadOptions,
        internal_key: &[u8],
        ctx: &mut dyn GetContext,
        skip_filters: bool,
    ) -> Result<()> {
        let rep = &self.rep;
        let filter_key = rep.filter_key(internal_key);
        let filter = if skip_filters {
            None
        } else {
            rep.get_filter(read_options.is_no_io(), Some(filter_key))
        };
        let block_based = rep.filter_type == FilterType::BlockBased;

        let may_match = block_based
            || rep.non_block_based_filter_key_may_match(filter.as_deref(), filter_key);
        if !may_match {
            rep.record(Ticker::BloomFilterUseful);
            return Ok(());
        }

        let mut index_iter = rep.new_index_iterator(read_options);
        index_iter.seek(internal_key);
        while index_iter.valid() {
            if let (true, Some(filter)) = (block_based, filter.as_deref()) {
                rep.record(Ticker::BloomFilterChecked);
                let absent = BlockHandle::decode(index_iter.value())
                    .map_or(false, |h| !filter.key_may_match(filter_key, Some(h.offset)));
                if absent {
                    rep.record(Ticker::BloomFilterUseful);
                    break;
                }
            }

            let mut block_iter = rep.new_data_block_iter(read_options, index_iter.value());
            if let Err(e) = block_iter.status() {
                if read_options.is_no_io() && e.is_incomplete() {
                    ctx.mark_key_may_exist();
                    break;
                }
                return Err(e);
            }

            let mut done = false;
            block_iter.seek(internal_key);
            while block_iter.valid() {
                let parsed = parse_internal_key(block_iter.key())
                    .ok_or_else(|| Error::corruption("unparsable internal key in data block"))?;
                if !ctx.save_value(&parsed, block_iter.value()) {
                    done = true;
                    break;
                }
                block_iter.next();
            }
            block_iter.status()?;
            if done {
                break;
            }
            index_iter.next();
        }
        index_iter.status()
    }

    /// Iterator over every entry of the table.
    ///
    /// With a prefix extractor, seeks whose prefix the table provably lacks
    /// end invalid without reading a data block. With
    /// `read_options.use_bloom_on_scan` the iterator is additionally gated
    /// on the fixed-size filter; see [`FilterAwareIterator`].
    #[must_use]
    pub fn new_iterator(
        &self,
        read_options: &ReadOptions,
        skip_filters: bool,
    ) -> Box<dyn InternalIterator + Send> {
        let index = self.rep.new_index_iterator(read_options);
        let source = DataBlockSource {
            rep: Arc::clone(&self.rep),
            read_options: *read_options,
            skip_filters,
        };
        let iter = TwoLevelIterator::new(index, source);
        if !read_options.use_bloom_on_scan {
            return Box::new(iter);
        }
        Box::new(FilterAwareIterator::new(
            iter,
            TablePartitionFilter {
                rep: Arc::clone(&self.rep),
                read_options: *read_options,
                skip_filters,
            },
        ))
    }

    /// `false` if no key with the prefix of `internal_key` can be in the
    /// table. Never reads from the file.
    #[must_use]
    pub fn prefix_may_match(&self, internal_key: &[u8]) -> bool {
        self.rep.prefix_may_match(internal_key)
    }

    /// Loads the data blocks covering `[begin, end]` into the block cache,
    /// up to and including the first block whose index key is at or past
    /// `end`. Open bounds extend to the start or end of the table.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `begin` sorts after `end`; otherwise the first
    /// index or block read error.
    pub fn prefetch(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let cmp = KeyComparator::Internal;
        if let (Some(begin), Some(end)) = (begin, end) {
            if cmp.compare(begin, end) == Ordering::Greater {
                return Err(Error::InvalidArgument(
                    "prefetch range begins after it ends".to_string(),
                ));
            }
        }

        let read_options = ReadOptions::default();
        let mut index_iter = self.rep.new_index_iterator(&read_options);
        index_iter.status()?;
        match begin {
            Some(begin) => index_iter.seek(begin),
            None => index_iter.seek_to_first(),
        }

        let mut boundary_block = false;
        while index_iter.valid() {
            if let Some(end) = end {
                if cmp.compare(index_iter.key(), end) != Ordering::Less {
                    if boundary_block {
                        break;
                    }
                    boundary_block = true;
                }
            }
            self.rep
                .new_data_block_iter(&read_options, index_iter.value())
                .status()?;
            index_iter.next();
        }
        Ok(())
    }

    /// Approximate file offset of the data for `internal_key`.
    ///
    /// The offset of the block the index points at; past the last key, the
    /// data size from the properties, or the meta-index offset when that is
    /// unknown.
    #[must_use]
    pub fn approximate_offset_of(&self, internal_key: &[u8]) -> u64 {
        let rep = &self.rep;
        let mut index_iter = rep.new_index_iterator(&ReadOptions::default());
        index_iter.seek(internal_key);
        if index_iter.valid() {
            return match BlockHandle::decode(index_iter.value()) {
                Ok(handle) => handle.offset,
                Err(_) => rep.footer.metaindex_handle().offset,
            };
        }
        match rep.table_properties.as_ref().map_or(0, |p| p.data_size) {
            0 => rep.footer.metaindex_handle().offset,
            data_size => data_size,
        }
    }

    /// Whether the data block that may hold `internal_key` is in the
    /// primary block cache. Does not touch the cache statistics.
    pub fn key_in_cache(&self, read_options: &ReadOptions, internal_key: &[u8]) -> Result<bool> {
        let rep = &self.rep;
        let mut index_iter = rep.new_index_iterator(read_options);
        index_iter.seek(internal_key);
        index_iter.status()?;
        if !index_iter.valid() {
            return Ok(false);
        }
        let handle = BlockHandle::decode(index_iter.value())?;
        let (Some(cache), Some(prefix)) = (
            rep.options.block_cache.as_deref(),
            rep.data.cache_key_prefix.as_ref(),
        ) else {
            return Ok(false);
        };
        Ok(cache.lookup(&prefix.key_for(&handle)).is_some())
    }
}

impl Rep {
    /// Table-level prefix gate, answered from memory and the block cache
    /// only.
    ///
    /// The filter is asked first. If it cannot rule the prefix out, the
    /// index is sought to the prefix: running off the end means no match
    /// (unless the index itself was not cached), an index key sharing the
    /// prefix means a possible match, and otherwise only the single block
    /// the index points at can hold the prefix, which a block-based filter
    /// can check.
    pub(crate) fn prefix_may_match(&self, internal_key: &[u8]) -> bool {
        if self.filter_policy.is_none() {
            return true;
        }
        let Some(extractor) = self.reader_options.prefix_extractor.as_ref() else {
            return true;
        };
        let user_key = extract_user_key(internal_key);
        let filter_key = self.filter_key(internal_key);
        if !extractor.in_domain(filter_key) || !extractor.in_domain(user_key) {
            return true;
        }
        let user_key_prefix = extractor.transform(user_key);
        let filter_key_prefix = extractor.transform(filter_key);
        let internal_prefix =
            make_internal_key(user_key_prefix, MAX_SEQUENCE_NUMBER, ValueType::Value);

        let no_io = ReadOptions::no_io();
        let filter = self.get_filter(true, Some(filter_key));
        let block_based = self.filter_type == FilterType::BlockBased;

        let mut may_match = true;
        if let Some(filter) = filter.as_deref() {
            if !block_based {
                may_match = filter.prefix_may_match(filter_key_prefix, None);
            }
        }

        if may_match {
            let mut index_iter = self.new_index_iterator(&no_io);
            index_iter.seek(&internal_prefix);
            if !index_iter.valid() {
                may_match = matches!(index_iter.status(), Err(ref e) if e.is_incomplete());
            } else if extract_user_key(index_iter.key()).starts_with(user_key_prefix) {
                // The next block may still start with the prefix.
                may_match = true;
            } else if let (true, Some(filter)) = (block_based, filter.as_deref()) {
                if let Ok(handle) = BlockHandle::decode(index_iter.value()) {
                    may_match = filter.prefix_may_match(filter_key_prefix, Some(handle.offset));
                }
            }
        }

        self.record(Ticker::BloomFilterPrefixChecked);
        if !may_match {
            self.record(Ticker::BloomFilterPrefixUseful);
        }
        may_match
    }
}
