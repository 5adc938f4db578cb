//! Block-based table reader.
//!
//! A [`TableReader`] is opened once per file and then shared by any number
//! of concurrent readers. Everything it holds after [`TableReader::open`] is
//! immutable apart from the fixed-size filter index, which is built on first
//! use. Blocks read later are either leased from the block cache or owned by
//! the iterator that asked for them.

mod blocks;
mod dump;
mod lookup;

use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};

use crate::block::{read_block, Block, BlockIter};
use crate::cache::{BlockCache, CachableEntry, CacheHandle, CacheKeyPrefix};
use crate::error::{Error, Result};
use crate::file::RandomAccessFile;
use crate::filter::{FilterReader, FilterSettings};
use crate::format::{read_block_contents, BlockContents, BlockHandle, Footer};
use crate::index::IndexReader;
use crate::iterator::InternalIterator;
use crate::key::{extract_user_key, KeyComparator};
use crate::options::{FilterPolicy, IndexType, ReadOptions, ReaderOptions, TableOptions};
use crate::properties::{
    find_meta_block, names, read_properties, TableProperties, FILTER_BLOCK_PREFIX,
    FIXED_SIZE_FILTER_BLOCK_PREFIX, FULL_FILTER_BLOCK_PREFIX, PROPERTIES_BLOCK,
};
use crate::stats::Ticker;

/// Filter layout found in the meta-index for the configured policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    None,
    BlockBased,
    Full,
    FixedSize,
}

/// A byte source together with the cache key prefixes of its blocks.
pub(crate) struct FileWithCachePrefix {
    file: Arc<dyn RandomAccessFile>,
    cache_key_prefix: Option<CacheKeyPrefix>,
    compressed_cache_key_prefix: Option<CacheKeyPrefix>,
}

impl FileWithCachePrefix {
    fn new(file: Arc<dyn RandomAccessFile>, options: &TableOptions) -> Self {
        let cache_key_prefix = options
            .block_cache
            .as_deref()
            .map(|cache| CacheKeyPrefix::generate(cache, file.as_ref()));
        let compressed_cache_key_prefix = options
            .block_cache_compressed
            .as_deref()
            .map(|cache| CacheKeyPrefix::generate(cache, file.as_ref()));
        Self {
            file,
            cache_key_prefix,
            compressed_cache_key_prefix,
        }
    }
}

/// Shared state of an open table.
pub(crate) struct Rep {
    options: TableOptions,
    reader_options: ReaderOptions,
    /// `None` when filters are skipped for this table.
    filter_policy: Option<FilterPolicy>,
    footer: Footer,
    /// Index, filter and meta blocks.
    base: Arc<FileWithCachePrefix>,
    /// Data blocks. The same file as `base` unless the table was opened
    /// with a separate data file.
    data: Arc<FileWithCachePrefix>,
    /// Raw index type from the properties block.
    index_type: u32,
    data_index_reader: Option<Arc<IndexReader>>,
    filter_index_reader: OnceLock<Arc<IndexReader>>,
    filter: Option<Arc<FilterReader>>,
    not_matching: Arc<FilterReader>,
    filter_type: FilterType,
    filter_handle: BlockHandle,
    table_properties: Option<Arc<TableProperties>>,
    whole_key_filtering: bool,
    prefix_filtering: bool,
}

/// Reader for one immutable block-based table file.
///
/// Cloning is cheap and shares the open table.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use sstable::{FsFile, LookupContext, RandomAccessFile, ReadOptions, TableReader};
///
/// # fn main() -> sstable::Result<()> {
/// let file: Arc<dyn RandomAccessFile> = Arc::new(FsFile::open("000042.sst")?);
/// let size = file.size();
/// let table = TableReader::open(file, size, Default::default(), Default::default())?;
///
/// let key = sstable::make_internal_key(b"user-key", sstable::MAX_SEQUENCE_NUMBER, sstable::ValueType::Value);
/// let mut ctx = LookupContext::new("user-key");
/// table.get(&ReadOptions::default(), &key, &mut ctx, false)?;
/// println!("{:?}", ctx.state());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TableReader {
    rep: Arc<Rep>,
}

impl TableReader {
    /// Opens the table stored in `file`.
    ///
    /// Reads the footer and the meta-index, picks the filter for the
    /// configured policy and loads the table properties. With
    /// `prefetch_index_and_filter` the index and filter are built now:
    /// kept in the reader, or inserted into the block cache when
    /// `cache_index_and_filter_blocks` is set.
    ///
    /// # Errors
    ///
    /// `Corruption` or `UnknownVersion` for a bad footer, the error of the
    /// meta-index read, and, while prefetching, the error of building the
    /// index. `InvalidArgument` if index and filter caching is requested
    /// without a block cache.
    pub fn open(
        file: Arc<dyn RandomAccessFile>,
        file_size: u64,
        options: TableOptions,
        reader_options: ReaderOptions,
    ) -> Result<Self> {
        let rep = Rep::open(file, file_size, options, reader_options)?;
        Ok(Self { rep: Arc::new(rep) })
    }

    /// Opens a table whose data blocks live in `data_file` while index,
    /// filter and meta blocks come from `base`.
    pub fn open_with_data_file(
        base: Arc<dyn RandomAccessFile>,
        base_size: u64,
        data_file: Arc<dyn RandomAccessFile>,
        options: TableOptions,
        reader_options: ReaderOptions,
    ) -> Result<Self> {
        let mut rep = Rep::open(base, base_size, options, reader_options)?;
        rep.data = Arc::new(FileWithCachePrefix::new(data_file, &rep.options));
        Ok(Self { rep: Arc::new(rep) })
    }

    /// Properties block of the table, if it could be read.
    #[must_use]
    pub fn table_properties(&self) -> Option<&TableProperties> {
        self.rep.table_properties.as_deref()
    }

    #[must_use]
    pub fn footer(&self) -> &Footer {
        &self.rep.footer
    }

    #[must_use]
    pub fn filter_type(&self) -> FilterType {
        self.rep.filter_type
    }

    /// Memory held by the reader itself: the preloaded filter and index and
    /// the fixed-size filter index. Cached blocks are not counted.
    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        let rep = &self.rep;
        rep.filter
            .as_ref()
            .map_or(0, |f| f.approximate_memory_usage())
            + rep
                .filter_index_reader
                .get()
                .map_or(0, |r| r.approximate_memory_usage())
            + rep
                .data_index_reader
                .as_ref()
                .map_or(0, |r| r.approximate_memory_usage())
    }

    #[must_use]
    pub fn filter_block_preloaded(&self) -> bool {
        self.rep.filter.is_some()
    }

    #[must_use]
    pub fn index_reader_preloaded(&self) -> bool {
        self.rep.data_index_reader.is_some()
    }
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("footer", &self.rep.footer)
            .field("filter_type", &self.rep.filter_type)
            .field("index_type", &self.rep.index_type)
            .field("index_preloaded", &self.index_reader_preloaded())
            .field("filter_preloaded", &self.filter_block_preloaded())
            .finish()
    }
}

impl Rep {
    fn open(
        file: Arc<dyn RandomAccessFile>,
        file_size: u64,
        options: TableOptions,
        reader_options: ReaderOptions,
    ) -> Result<Self> {
        if options.cache_index_and_filter_blocks && options.block_cache.is_none() {
            return Err(Error::InvalidArgument(
                "caching index and filter blocks requires a block cache".to_string(),
            ));
        }
        let footer = Footer::read_from(file.as_ref(), file_size)?;
        let base = Arc::new(FileWithCachePrefix::new(file, &options));
        let filter_policy = if reader_options.skip_filters {
            None
        } else {
            options.filter_policy.clone()
        };
        let mut rep = Rep {
            whole_key_filtering: options.whole_key_filtering,
            prefix_filtering: true,
            options,
            reader_options,
            filter_policy,
            footer,
            data: Arc::clone(&base),
            base,
            index_type: IndexType::BinarySearch.as_u32(),
            data_index_reader: None,
            filter_index_reader: OnceLock::new(),
            filter: None,
            not_matching: Arc::new(FilterReader::not_matching()),
            filter_type: FilterType::None,
            filter_handle: BlockHandle::NULL,
            table_properties: None,
        };

        let meta = rep.read_meta_block().map_err(|e| {
            error!(error = %e, "failed to read the metaindex block");
            e
        })?;
        let mut meta_iter = meta.iter(KeyComparator::Bytewise);

        if let Some(policy) = &rep.filter_policy {
            let candidates = [
                (FULL_FILTER_BLOCK_PREFIX, FilterType::Full),
                (FILTER_BLOCK_PREFIX, FilterType::BlockBased),
                (FIXED_SIZE_FILTER_BLOCK_PREFIX, FilterType::FixedSize),
            ];
            for (prefix, filter_type) in candidates {
                let name = format!("{}{}", prefix, policy.name);
                // An unreadable entry means no filter of this kind.
                if let Ok(Some(handle)) = find_meta_block(&mut meta_iter, name.as_bytes()) {
                    rep.filter_handle = handle;
                    rep.filter_type = filter_type;
                    break;
                }
            }
        }

        match find_meta_block(&mut meta_iter, PROPERTIES_BLOCK) {
            Err(e) => warn!(error = %e, "cannot seek to the properties block"),
            Ok(None) => error!("cannot find the properties block in the table file"),
            Ok(Some(handle)) => {
                match read_properties(rep.base.file.as_ref(), &rep.footer, &handle) {
                    Ok(props) => rep.table_properties = Some(Arc::new(props)),
                    Err(e) => warn!(error = %e, "error while reading the properties block"),
                }
            }
        }
        if let Some(props) = &rep.table_properties {
            rep.whole_key_filtering &= props.is_feature_supported(names::WHOLE_KEY_FILTERING);
            rep.prefix_filtering &= props.is_feature_supported(names::PREFIX_FILTERING);
            if let Some(index_type) = props.index_type() {
                rep.index_type = index_type;
            }
        }

        if rep.reader_options.prefetch_index_and_filter {
            if rep.filter_policy.is_some() && rep.filter_type == FilterType::FixedSize {
                if let Err(e) = rep.filter_index_reader() {
                    warn!(error = %e, "failed to build the fixed-size filter index; retrying on first use");
                }
            }
            let whole_filter = matches!(rep.filter_type, FilterType::Full | FilterType::BlockBased);
            if rep.options.cache_index_and_filter_blocks {
                rep.new_index_iterator(&ReadOptions::default()).status()?;
                if whole_filter {
                    drop(rep.get_filter(false, None));
                }
            } else {
                let reader = rep.create_data_block_index_reader(Some(&mut meta_iter))?;
                rep.data_index_reader = Some(Arc::new(reader));
                if whole_filter {
                    rep.filter = rep
                        .read_filter_block(&rep.filter_handle)
                        .map(|(filter, _)| Arc::new(filter));
                }
            }
        }

        debug!(
            footer_version = rep.footer.version(),
            filter_type = ?rep.filter_type,
            index_type = rep.index_type,
            whole_key_filtering = rep.whole_key_filtering,
            prefix_filtering = rep.prefix_filtering,
            index_preloaded = rep.data_index_reader.is_some(),
            filter_preloaded = rep.filter.is_some(),
            "opened table"
        );
        Ok(rep)
    }

    fn record(&self, ticker: Ticker) {
        self.reader_options.statistics.record(ticker, 1);
    }

    fn read_meta_block(&self) -> Result<Block> {
        self.record(Ticker::BlockReads);
        read_block(
            self.base.file.as_ref(),
            &self.footer,
            true,
            &self.footer.metaindex_handle(),
        )
    }

    fn read_contents(
        &self,
        file: &dyn RandomAccessFile,
        handle: &BlockHandle,
        verify_checksums: bool,
        decompress: bool,
    ) -> Result<BlockContents> {
        self.record(Ticker::BlockReads);
        read_block_contents(file, &self.footer, verify_checksums, handle, decompress)
    }

    fn lookup_cache(
        &self,
        cache: &dyn BlockCache,
        key: &[u8],
        miss: Ticker,
        hit: Ticker,
    ) -> Option<CacheHandle> {
        let handle = cache.lookup(key);
        self.record(if handle.is_some() { hit } else { miss });
        handle
    }

    /// The part of an internal key that filters are built on.
    fn filter_key<'a>(&self, internal_key: &'a [u8]) -> &'a [u8] {
        let user_key = extract_user_key(internal_key);
        match self
            .filter_policy
            .as_ref()
            .and_then(|p| p.key_transformer.as_ref())
        {
            Some(transformer) => transformer.transform(user_key),
            None => user_key,
        }
    }

    fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            prefix_extractor: if self.prefix_filtering {
                self.reader_options.prefix_extractor.clone()
            } else {
                None
            },
            whole_key_filtering: self.whole_key_filtering,
        }
    }

    /// Reads and decodes a filter block of this table's filter type,
    /// returning it with its cache charge. Failures mean "no filter".
    fn read_filter_block(&self, handle: &BlockHandle) -> Option<(FilterReader, usize)> {
        let contents = match self.read_contents(self.base.file.as_ref(), handle, true, true) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, offset = handle.offset, "unreadable filter block; reading without a filter");
                return None;
            }
        };
        let charge = contents.data.len();
        let settings = self.filter_settings();
        let reader = match self.filter_type {
            FilterType::BlockBased => Ok(FilterReader::block_based(settings, contents.data)),
            FilterType::Full => FilterReader::full(settings, &contents.data),
            FilterType::FixedSize => FilterReader::fixed_size(settings, &contents.data),
            FilterType::None => return None,
        };
        match reader {
            Ok(reader) => Some((reader, charge)),
            Err(e) => {
                warn!(error = %e, offset = handle.offset, "undecodable filter block; reading without a filter");
                None
            }
        }
    }

    fn filter_index_reader(&self) -> Result<Arc<IndexReader>> {
        if let Some(reader) = self.filter_index_reader.get() {
            return Ok(Arc::clone(reader));
        }
        self.record(Ticker::BlockReads);
        let reader = Arc::new(IndexReader::binary_search(
            self.base.file.as_ref(),
            &self.footer,
            &self.filter_handle,
            KeyComparator::Bytewise,
        )?);
        // A concurrent builder may have won; either copy is equivalent.
        Ok(Arc::clone(self.filter_index_reader.get_or_init(|| reader)))
    }

    /// Handle of the fixed-size filter segment covering `filter_key`, or
    /// `None` when the key sorts past every segment.
    fn fixed_size_filter_handle(&self, filter_key: &[u8]) -> Result<Option<BlockHandle>> {
        let index = self.filter_index_reader()?;
        let mut iter = index.new_iterator(true);
        iter.seek(filter_key);
        iter.status()?;
        if !iter.valid() {
            return Ok(None);
        }
        BlockHandle::decode(iter.value()).map(Some)
    }

    /// The filter that applies to `filter_key`.
    ///
    /// Without index and filter caching the preloaded filter is returned.
    /// Otherwise the filter block (or, for fixed-size filters, the segment
    /// covering `filter_key`) is looked up in the block cache and read on a
    /// miss. A cache-only miss yields `None`, except for fixed-size segments,
    /// which are always read.
    fn get_filter(
        &self,
        no_io: bool,
        filter_key: Option<&[u8]>,
    ) -> Option<CachableEntry<FilterReader>> {
        let fixed_size = self.filter_type == FilterType::FixedSize;
        if !self.options.cache_index_and_filter_blocks && !fixed_size {
            return self.filter.clone().map(CachableEntry::Shared);
        }
        self.filter_policy.as_ref()?;
        let cache = self.options.block_cache.as_deref()?;
        let prefix = self.base.cache_key_prefix.as_ref()?;

        let handle = if fixed_size {
            match self.fixed_size_filter_handle(filter_key?) {
                Ok(Some(handle)) => handle,
                Ok(None) => return Some(CachableEntry::Shared(Arc::clone(&self.not_matching))),
                Err(e) => {
                    error!(error = %e, "failed to locate the fixed-size filter block");
                    return None;
                }
            }
        } else {
            self.filter_handle
        };

        let key = prefix.key_for(&handle);
        if let Some(cached) = self.lookup_cache(
            cache,
            &key,
            Ticker::BlockCacheFilterMiss,
            Ticker::BlockCacheFilterHit,
        ) {
            return match CachableEntry::from_handle(cached) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "ignoring cached filter entry");
                    None
                }
            };
        }
        if no_io && !fixed_size {
            return None;
        }

        let (reader, charge) = self.read_filter_block(&handle)?;
        match cache.insert(&key, Arc::new(reader), charge) {
            Ok(cached) => {
                self.record(Ticker::BlockCacheAdd);
                CachableEntry::from_handle(cached).ok()
            }
            Err(e) => {
                self.record(Ticker::BlockCacheAddFailures);
                debug!(error = %e, "filter block not cached");
                None
            }
        }
    }

    /// `false` only if a whole-table or fixed-size filter rules the key out.
    fn non_block_based_filter_key_may_match(
        &self,
        filter: Option<&FilterReader>,
        filter_key: &[u8],
    ) -> bool {
        debug_assert!(self.filter_type != FilterType::BlockBased);
        let Some(filter) = filter else {
            return true;
        };
        self.record(Ticker::BloomFilterChecked);
        if !filter.key_may_match(filter_key, None) {
            return false;
        }
        if let Some(extractor) = &self.reader_options.prefix_extractor {
            if extractor.in_domain(filter_key)
                && !filter.prefix_may_match(extractor.transform(filter_key), None)
            {
                return false;
            }
        }
        true
    }

    /// Builds the data index reader of the type recorded in the file.
    ///
    /// A hash index needs a prefix extractor and the meta-index; without
    /// either it falls back to binary search.
    fn create_data_block_index_reader(
        &self,
        meta_iter: Option<&mut BlockIter>,
    ) -> Result<IndexReader> {
        let file = self.base.file.as_ref();
        let handle = self.footer.index_handle();
        let binary_search = || {
            self.record(Ticker::BlockReads);
            IndexReader::binary_search(file, &self.footer, &handle, KeyComparator::Internal)
        };

        let index_type = IndexType::from_u32(self.index_type).ok_or_else(|| {
            Error::InvalidArgument(format!("unrecognized index type: {}", self.index_type))
        })?;
        let extractor = match (index_type, &self.reader_options.prefix_extractor) {
            (IndexType::BinarySearch, _) => return binary_search(),
            (IndexType::HashSearch, None) => {
                warn!("hash search index requires a prefix extractor; falling back to binary search");
                return binary_search();
            }
            (IndexType::HashSearch, Some(extractor)) => Arc::clone(extractor),
        };

        let mut owned_meta_iter: BlockIter;
        let meta_iter = match meta_iter {
            Some(iter) => iter,
            None => match self.read_meta_block() {
                Ok(block) => {
                    owned_meta_iter = block.iter(KeyComparator::Bytewise);
                    &mut owned_meta_iter
                }
                Err(e) => {
                    warn!(error = %e, "unable to read the metaindex block; falling back to binary search");
                    return binary_search();
                }
            },
        };
        self.record(Ticker::BlockReads);
        IndexReader::hash(
            file,
            &self.footer,
            &handle,
            meta_iter,
            extractor,
            self.options.hash_index_allow_collision,
        )
    }

    /// Iterator over the data index.
    ///
    /// Uses the preloaded reader if there is one; otherwise the reader is
    /// looked up in the block cache and built and inserted on a miss. The
    /// returned iterator keeps the cache entry pinned. Errors, including a
    /// cache-only miss, are reported through the iterator's status.
    fn new_index_iterator(&self, read_options: &ReadOptions) -> BlockIter {
        if let Some(reader) = &self.data_index_reader {
            return reader.new_iterator(read_options.total_order_seek);
        }
        let (Some(cache), Some(prefix)) = (
            self.options.block_cache.as_deref(),
            self.base.cache_key_prefix.as_ref(),
        ) else {
            if read_options.is_no_io() {
                return BlockIter::error(Error::no_io());
            }
            return match self.create_data_block_index_reader(None) {
                Ok(reader) => reader.new_iterator(read_options.total_order_seek),
                Err(e) => BlockIter::error(e),
            };
        };

        let key = prefix.key_for(&self.footer.index_handle());
        let handle = match self.lookup_cache(
            cache,
            &key,
            Ticker::BlockCacheIndexMiss,
            Ticker::BlockCacheIndexHit,
        ) {
            Some(handle) => handle,
            None if read_options.is_no_io() => return BlockIter::error(Error::no_io()),
            None => {
                let reader = match self.create_data_block_index_reader(None) {
                    Ok(reader) => reader,
                    Err(e) => return BlockIter::error(e),
                };
                let charge = reader.usable_size();
                match cache.insert(&key, Arc::new(reader), charge) {
                    Ok(handle) => {
                        self.record(Ticker::BlockCacheAdd);
                        handle
                    }
                    Err(e) => {
                        self.record(Ticker::BlockCacheAddFailures);
                        return BlockIter::error(e);
                    }
                }
            }
        };
        match CachableEntry::<IndexReader>::from_handle(handle) {
            Ok(entry) => {
                let (reader, lease) = entry.into_parts();
                reader
                    .new_iterator(read_options.total_order_seek)
                    .pinned(lease)
            }
            Err(e) => BlockIter::error(e),
        }
    }
}
