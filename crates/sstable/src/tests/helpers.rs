//! Table and block builders for tests.
//!
//! The reader has no writer of its own, so tests assemble files byte by
//! byte here, in the same layout the store's table builder produces.

use std::collections::BTreeMap;
use std::sync::Arc;

use bloom::BloomFilter;

use crate::coding::put_varint64;
use crate::compress::CompressionType;
use crate::file::MemFile;
use crate::format::{BlockHandle, ChecksumType, Footer};
use crate::key::{extract_user_key, make_internal_key, SliceTransform, ValueType};
use crate::options::{IndexType, KeyTransformer, DEFAULT_FILTER_POLICY_NAME};
use crate::properties::{
    names, FILTER_BLOCK_PREFIX, FIXED_SIZE_FILTER_BLOCK_PREFIX, FULL_FILTER_BLOCK_PREFIX,
    HASH_INDEX_PREFIXES_BLOCK, HASH_INDEX_PREFIXES_METADATA_BLOCK, PROPERTIES_BLOCK, PROP_FALSE,
    PROP_TRUE,
};

pub const BITS_PER_KEY: usize = 10;

pub fn ikey(user_key: &[u8], sequence: u64) -> Vec<u8> {
    make_internal_key(user_key, sequence, ValueType::Value)
}

pub fn tombstone(user_key: &[u8], sequence: u64) -> Vec<u8> {
    make_internal_key(user_key, sequence, ValueType::Deletion)
}

/// `count` entries `key000..`, one version each, with values `value<i>`.
pub fn numbered_entries(count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..count)
        .map(|i| {
            (
                ikey(format!("key{:03}", i).as_bytes(), 100),
                format!("value{}", i).into_bytes(),
            )
        })
        .collect()
}

/// Prefix-compressed block writer.
pub struct BlockBuilder {
    buf: Vec<u8>,
    restarts: Vec<u32>,
    interval: usize,
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(interval: usize) -> Self {
        Self {
            buf: Vec::new(),
            restarts: vec![0],
            interval: interval.max(1),
            counter: 0,
            last_key: Vec::new(),
        }
    }

    /// Keys must be added in the order the block will be searched in.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.counter < self.interval {
            self.last_key
                .iter()
                .zip(key)
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
            0
        };
        put_varint64(&mut self.buf, shared as u64);
        put_varint64(&mut self.buf, (key.len() - shared) as u64);
        put_varint64(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);
        self.last_key = key.to_vec();
        self.counter += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(mut self) -> Vec<u8> {
        for r in &self.restarts {
            self.buf.extend_from_slice(&r.to_le_bytes());
        }
        self.buf
            .extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.buf
    }
}

pub fn bloom_bytes(keys: &[Vec<u8>]) -> Vec<u8> {
    let mut bloom = BloomFilter::with_bits_per_key(keys.len(), BITS_PER_KEY);
    for k in keys {
        bloom.insert(k);
    }
    bloom.to_bytes()
}

/// Block-based filter for data blocks at the given offsets. One sub-filter
/// per `1 << base_lg` bytes of data; ranges without a block get an empty
/// filter.
pub fn build_block_based_filter(blocks: &[(u64, Vec<Vec<u8>>)], base_lg: u8) -> Vec<u8> {
    let mut result = Vec::new();
    let mut offsets: Vec<u32> = Vec::new();
    let mut pending: Vec<Vec<u8>> = Vec::new();

    fn generate(result: &mut Vec<u8>, offsets: &mut Vec<u32>, pending: &mut Vec<Vec<u8>>) {
        offsets.push(result.len() as u32);
        if !pending.is_empty() {
            result.extend_from_slice(&bloom_bytes(pending.as_slice()));
            pending.clear();
        }
    }

    for (offset, keys) in blocks {
        let index = (offset >> base_lg) as usize;
        while index > offsets.len() {
            generate(&mut result, &mut offsets, &mut pending);
        }
        pending.extend(keys.iter().cloned());
    }
    if !pending.is_empty() {
        generate(&mut result, &mut offsets, &mut pending);
    }

    let array_offset = result.len() as u32;
    for o in &offsets {
        result.extend_from_slice(&o.to_le_bytes());
    }
    result.extend_from_slice(&array_offset.to_le_bytes());
    result.push(base_lg);
    result
}

/// Takes the first `len` bytes of a user key as its filter key.
pub struct HeadTransformer(pub usize);

impl KeyTransformer for HeadTransformer {
    fn transform<'a>(&self, user_key: &'a [u8]) -> &'a [u8] {
        &user_key[..self.0.min(user_key.len())]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    None,
    Full,
    BlockBased,
    /// Segments of at most `keys_per_filter` distinct filter keys.
    FixedSize { keys_per_filter: usize },
}

/// Writes a complete table from sorted internal-key entries.
pub struct TableBuilder {
    pub format_version: u32,
    pub checksum: ChecksumType,
    pub compression: CompressionType,
    pub filter: FilterKind,
    pub policy_name: String,
    pub key_transformer: Option<Arc<dyn KeyTransformer>>,
    pub prefix_extractor: Option<Arc<dyn SliceTransform>>,
    pub whole_key_filtering: bool,
    pub index_type: IndexType,
    pub entries_per_block: usize,
    pub restart_interval: usize,
    pub write_properties: bool,
    pub extra_properties: Vec<(String, Vec<u8>)>,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self {
            format_version: 2,
            checksum: ChecksumType::Crc32c,
            compression: CompressionType::None,
            filter: FilterKind::None,
            policy_name: DEFAULT_FILTER_POLICY_NAME.to_string(),
            key_transformer: None,
            prefix_extractor: None,
            whole_key_filtering: true,
            index_type: IndexType::BinarySearch,
            entries_per_block: 4,
            restart_interval: 2,
            write_properties: true,
            extra_properties: Vec::new(),
        }
    }
}

/// A table image plus the locations of its parts.
pub struct BuiltTable {
    pub bytes: Vec<u8>,
    pub data_blocks: Vec<BlockHandle>,
    pub filter_handle: Option<BlockHandle>,
    pub filter_segments: Vec<BlockHandle>,
    pub properties_handle: Option<BlockHandle>,
    /// Every meta block by its meta-index name.
    pub meta: BTreeMap<Vec<u8>, BlockHandle>,
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl BuiltTable {
    pub fn file(&self) -> Arc<MemFile> {
        Arc::new(MemFile::new(self.bytes.clone()))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Overwrites one byte, e.g. to corrupt a block.
    pub fn flip_byte(&mut self, offset: u64) {
        self.bytes[offset as usize] ^= 0xff;
    }
}

impl TableBuilder {
    fn checksum_type(&self) -> ChecksumType {
        if self.format_version == 0 {
            ChecksumType::Crc32c
        } else {
            self.checksum
        }
    }

    fn filter_entries(&self, user_key: &[u8], out: &mut Vec<Vec<u8>>) {
        let filter_key = self.filter_key(user_key);
        if self.whole_key_filtering {
            out.push(filter_key.to_vec());
        }
        if let Some(extractor) = &self.prefix_extractor {
            if extractor.in_domain(filter_key) {
                out.push(extractor.transform(filter_key).to_vec());
            }
        }
    }

    fn filter_key<'a>(&self, user_key: &'a [u8]) -> &'a [u8] {
        match &self.key_transformer {
            Some(t) => t.transform(user_key),
            None => user_key,
        }
    }

    fn write_block(&self, out: &mut Vec<u8>, raw: &[u8], compress: bool) -> BlockHandle {
        let compression = if compress {
            self.compression
        } else {
            CompressionType::None
        };
        let payload = match compression {
            CompressionType::None => raw.to_vec(),
            codec => {
                let mut payload = Vec::new();
                if self.format_version >= 2 {
                    put_varint64(&mut payload, raw.len() as u64);
                } else {
                    payload.extend_from_slice(&(raw.len() as u64).to_le_bytes());
                }
                let compressed = match codec {
                    CompressionType::Lz4 => lz4::block::compress(raw, None, false).unwrap(),
                    CompressionType::Lz4hc => lz4::block::compress(
                        raw,
                        Some(lz4::block::CompressionMode::HIGHCOMPRESSION(9)),
                        false,
                    )
                    .unwrap(),
                    _ => zstd::bulk::compress(raw, 3).unwrap(),
                };
                payload.extend_from_slice(&compressed);
                payload
            }
        };
        let handle = BlockHandle::new(out.len() as u64, payload.len() as u64);
        let tag = compression.as_u8();
        let checksum = self.checksum_type().compute(&payload, tag);
        out.extend_from_slice(&payload);
        out.push(tag);
        out.extend_from_slice(&checksum.to_le_bytes());
        handle
    }

    pub fn build(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> BuiltTable {
        let mut out = Vec::new();
        let per_block = self.entries_per_block.max(1);

        // Data blocks.
        let mut data_blocks = Vec::new();
        let mut index_entries: Vec<(Vec<u8>, BlockHandle)> = Vec::new();
        let mut block_filter_keys: Vec<(u64, Vec<Vec<u8>>)> = Vec::new();
        let mut block_prefixes: Vec<Vec<Vec<u8>>> = Vec::new();
        for chunk in entries.chunks(per_block) {
            let mut block = BlockBuilder::new(self.restart_interval);
            let mut keys = Vec::new();
            let mut prefixes: Vec<Vec<u8>> = Vec::new();
            for (k, v) in chunk {
                block.add(k, v);
                let user_key = extract_user_key(k);
                self.filter_entries(user_key, &mut keys);
                if let Some(extractor) = &self.prefix_extractor {
                    if extractor.in_domain(user_key) {
                        let p = extractor.transform(user_key).to_vec();
                        if prefixes.last() != Some(&p) {
                            prefixes.push(p);
                        }
                    }
                }
            }
            let handle = self.write_block(&mut out, &block.finish(), true);
            data_blocks.push(handle);
            block_filter_keys.push((handle.offset, keys));
            block_prefixes.push(prefixes);
            if let Some((last, _)) = chunk.last() {
                index_entries.push((last.clone(), handle));
            }
        }
        let data_size = out.len() as u64;

        // Filter blocks.
        let mut meta: BTreeMap<Vec<u8>, BlockHandle> = BTreeMap::new();
        let mut filter_handle = None;
        let mut filter_segments = Vec::new();
        let filter_start = out.len();
        match self.filter {
            FilterKind::None => {}
            FilterKind::Full => {
                let keys: Vec<Vec<u8>> = block_filter_keys
                    .iter()
                    .flat_map(|(_, keys)| keys.iter().cloned())
                    .collect();
                let handle = self.write_block(&mut out, &bloom_bytes(&keys), false);
                meta.insert(
                    format!("{}{}", FULL_FILTER_BLOCK_PREFIX, self.policy_name).into_bytes(),
                    handle,
                );
                filter_handle = Some(handle);
            }
            FilterKind::BlockBased => {
                let raw = build_block_based_filter(&block_filter_keys, 11);
                let handle = self.write_block(&mut out, &raw, false);
                meta.insert(
                    format!("{}{}", FILTER_BLOCK_PREFIX, self.policy_name).into_bytes(),
                    handle,
                );
                filter_handle = Some(handle);
            }
            FilterKind::FixedSize { keys_per_filter } => {
                let mut segments: Vec<(Vec<u8>, Vec<Vec<u8>>)> = Vec::new();
                let mut distinct: Vec<Vec<u8>> = Vec::new();
                let mut pending: Vec<Vec<u8>> = Vec::new();
                for (k, _) in entries {
                    let user_key = extract_user_key(k);
                    let filter_key = self.filter_key(user_key);
                    if distinct.last().map(Vec::as_slice) == Some(filter_key) {
                        continue;
                    }
                    if distinct.len() == keys_per_filter.max(1) {
                        let last = distinct.last().cloned().unwrap_or_default();
                        segments.push((last, std::mem::take(&mut pending)));
                        distinct.clear();
                    }
                    distinct.push(filter_key.to_vec());
                    self.filter_entries(user_key, &mut pending);
                }
                if let Some(last) = distinct.last() {
                    segments.push((last.clone(), pending));
                }

                let mut index = BlockBuilder::new(1);
                for (last, keys) in &segments {
                    let handle = self.write_block(&mut out, &bloom_bytes(keys), false);
                    filter_segments.push(handle);
                    index.add(last, &handle.encode());
                }
                let handle = self.write_block(&mut out, &index.finish(), false);
                meta.insert(
                    format!("{}{}", FIXED_SIZE_FILTER_BLOCK_PREFIX, self.policy_name)
                        .into_bytes(),
                    handle,
                );
                filter_handle = Some(handle);
            }
        }
        let filter_size = (out.len() - filter_start) as u64;

        // Hash index prefixes.
        if self.index_type == IndexType::HashSearch {
            let mut records: Vec<(Vec<u8>, u32, u32, usize)> = Vec::new();
            for (block_id, prefixes) in block_prefixes.iter().enumerate() {
                for p in prefixes {
                    match records.last_mut() {
                        Some((prefix, _, num_blocks, last_block)) if prefix == p => {
                            if *last_block != block_id {
                                *num_blocks += 1;
                                *last_block = block_id;
                            }
                        }
                        _ => records.push((p.clone(), block_id as u32, 1, block_id)),
                    }
                }
            }
            let mut prefixes = Vec::new();
            let mut metadata = Vec::new();
            for (p, first, num, _) in &records {
                prefixes.extend_from_slice(p);
                put_varint64(&mut metadata, p.len() as u64);
                put_varint64(&mut metadata, u64::from(*first));
                put_varint64(&mut metadata, u64::from(*num));
            }
            let handle = self.write_block(&mut out, &prefixes, false);
            meta.insert(HASH_INDEX_PREFIXES_BLOCK.to_vec(), handle);
            let handle = self.write_block(&mut out, &metadata, false);
            meta.insert(HASH_INDEX_PREFIXES_METADATA_BLOCK.to_vec(), handle);
        }

        // Index contents are needed for the properties.
        let index_interval = if self.index_type == IndexType::HashSearch {
            1
        } else {
            self.restart_interval
        };
        let mut index = BlockBuilder::new(index_interval);
        for (key, handle) in &index_entries {
            index.add(key, &handle.encode());
        }
        let index_raw = index.finish();

        // Properties.
        let mut properties_handle = None;
        if self.write_properties {
            let varint = |v: u64| {
                let mut out = Vec::new();
                put_varint64(&mut out, v);
                out
            };
            let flag = |on: bool| (if on { PROP_TRUE } else { PROP_FALSE }).to_vec();
            let mut props: BTreeMap<String, Vec<u8>> = BTreeMap::new();
            props.insert(names::DATA_SIZE.into(), varint(data_size));
            props.insert(names::INDEX_SIZE.into(), varint(index_raw.len() as u64));
            props.insert(names::FILTER_SIZE.into(), varint(filter_size));
            props.insert(
                names::RAW_KEY_SIZE.into(),
                varint(entries.iter().map(|(k, _)| k.len() as u64).sum()),
            );
            props.insert(
                names::RAW_VALUE_SIZE.into(),
                varint(entries.iter().map(|(_, v)| v.len() as u64).sum()),
            );
            props.insert(names::NUM_DATA_BLOCKS.into(), varint(data_blocks.len() as u64));
            props.insert(names::NUM_ENTRIES.into(), varint(entries.len() as u64));
            props.insert(names::FORMAT_VERSION.into(), varint(u64::from(self.format_version)));
            props.insert(names::FIXED_KEY_LEN.into(), varint(0));
            if self.filter != FilterKind::None {
                props.insert(names::FILTER_POLICY.into(), self.policy_name.clone().into_bytes());
            }
            props.insert(
                names::INDEX_TYPE.into(),
                self.index_type.as_u32().to_le_bytes().to_vec(),
            );
            props.insert(
                names::WHOLE_KEY_FILTERING.into(),
                flag(self.whole_key_filtering),
            );
            props.insert(
                names::PREFIX_FILTERING.into(),
                flag(self.prefix_extractor.is_some()),
            );
            for (name, value) in &self.extra_properties {
                props.insert(name.clone(), value.clone());
            }

            let mut block = BlockBuilder::new(1);
            for (name, value) in &props {
                block.add(name.as_bytes(), value);
            }
            let handle = self.write_block(&mut out, &block.finish(), false);
            meta.insert(PROPERTIES_BLOCK.to_vec(), handle);
            properties_handle = Some(handle);
        }

        // Meta-index, index, footer.
        let mut metaindex = BlockBuilder::new(1);
        for (name, handle) in &meta {
            metaindex.add(name, &handle.encode());
        }
        let metaindex_handle = self.write_block(&mut out, &metaindex.finish(), false);
        let index_handle = self.write_block(&mut out, &index_raw, true);
        let footer = Footer::new(
            self.format_version,
            self.checksum_type(),
            metaindex_handle,
            index_handle,
        );
        out.extend_from_slice(&footer.encode());

        BuiltTable {
            bytes: out,
            data_blocks,
            filter_handle,
            filter_segments,
            properties_handle,
            meta,
            metaindex_handle,
            index_handle,
        }
    }
}
