//! Meta block names, table properties and meta-index lookups.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::warn;

use crate::block::{read_block, Block, BlockIter};
use crate::coding::{decode_fixed32, get_varint64};
use crate::error::Result;
use crate::file::RandomAccessFile;
use crate::format::{BlockHandle, Footer};
use crate::iterator::InternalIterator;
use crate::key::KeyComparator;

pub const PROPERTIES_BLOCK: &[u8] = b"rocksdb.properties";
pub const HASH_INDEX_PREFIXES_BLOCK: &[u8] = b"rocksdb.hashindex.prefixes";
pub const HASH_INDEX_PREFIXES_METADATA_BLOCK: &[u8] = b"rocksdb.hashindex.metadata";

/// Meta-index key prefixes of the three filter layouts, followed by the
/// filter policy name.
pub const FILTER_BLOCK_PREFIX: &str = "filter.";
pub const FULL_FILTER_BLOCK_PREFIX: &str = "fullfilter.";
pub const FIXED_SIZE_FILTER_BLOCK_PREFIX: &str = "fixedsizefilter.";

pub const PROP_TRUE: &[u8] = b"1";
pub const PROP_FALSE: &[u8] = b"0";

pub mod names {
    pub const DATA_SIZE: &str = "rocksdb.data.size";
    pub const INDEX_SIZE: &str = "rocksdb.index.size";
    pub const FILTER_SIZE: &str = "rocksdb.filter.size";
    pub const RAW_KEY_SIZE: &str = "rocksdb.raw.key.size";
    pub const RAW_VALUE_SIZE: &str = "rocksdb.raw.value.size";
    pub const NUM_DATA_BLOCKS: &str = "rocksdb.num.data.blocks";
    pub const NUM_ENTRIES: &str = "rocksdb.num.entries";
    pub const FORMAT_VERSION: &str = "rocksdb.format.version";
    pub const FIXED_KEY_LEN: &str = "rocksdb.fixed.key.length";
    pub const FILTER_POLICY: &str = "rocksdb.filter.policy";

    pub const INDEX_TYPE: &str = "rocksdb.block.based.table.index.type";
    pub const WHOLE_KEY_FILTERING: &str = "rocksdb.block.based.table.whole.key.filtering";
    pub const PREFIX_FILTERING: &str = "rocksdb.block.based.table.prefix.filtering";
}

/// Properties recorded by the table builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProperties {
    pub data_size: u64,
    pub index_size: u64,
    pub filter_size: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub num_data_blocks: u64,
    pub num_entries: u64,
    pub format_version: u64,
    pub fixed_key_len: u64,
    pub filter_policy_name: String,
    /// Every property without a dedicated field, keyed by name.
    pub user_collected: BTreeMap<String, Vec<u8>>,
}

impl TableProperties {
    /// Decodes a properties block. Numeric properties that fail to decode
    /// are logged and skipped.
    pub fn decode(block: &Block) -> Result<Self> {
        let mut props = TableProperties::default();
        let mut iter = block.iter(KeyComparator::Bytewise);
        iter.seek_to_first();
        while iter.valid() {
            let key = String::from_utf8_lossy(iter.key()).into_owned();
            let value = iter.value();
            let slot = match key.as_str() {
                names::DATA_SIZE => Some(&mut props.data_size),
                names::INDEX_SIZE => Some(&mut props.index_size),
                names::FILTER_SIZE => Some(&mut props.filter_size),
                names::RAW_KEY_SIZE => Some(&mut props.raw_key_size),
                names::RAW_VALUE_SIZE => Some(&mut props.raw_value_size),
                names::NUM_DATA_BLOCKS => Some(&mut props.num_data_blocks),
                names::NUM_ENTRIES => Some(&mut props.num_entries),
                names::FORMAT_VERSION => Some(&mut props.format_version),
                names::FIXED_KEY_LEN => Some(&mut props.fixed_key_len),
                _ => None,
            };
            match slot {
                Some(field) => match get_varint64(value) {
                    Some((v, _)) => *field = v,
                    None => warn!(property = %key, "detected malformed value in properties block"),
                },
                None if key == names::FILTER_POLICY => {
                    props.filter_policy_name = String::from_utf8_lossy(value).into_owned();
                }
                None => {
                    props.user_collected.insert(key, value.to_vec());
                }
            }
            iter.next();
        }
        iter.status()?;
        Ok(props)
    }

    /// Whether a backward-compatibility feature flag is on. A missing flag
    /// means the file predates it and is treated as supported; values other
    /// than `"1"`/`"0"` are logged and treated as supported.
    #[must_use]
    pub fn is_feature_supported(&self, name: &str) -> bool {
        match self.user_collected.get(name) {
            None => true,
            Some(v) if v.as_slice() == PROP_FALSE => false,
            Some(v) => {
                if v.as_slice() != PROP_TRUE {
                    warn!(
                        property = name,
                        value = %String::from_utf8_lossy(v),
                        "property has an invalid value"
                    );
                }
                true
            }
        }
    }

    /// Index type recorded by the builder, if any.
    #[must_use]
    pub fn index_type(&self) -> Option<u32> {
        self.user_collected
            .get(names::INDEX_TYPE)
            .and_then(|v| decode_fixed32(v))
    }

    /// Renders the properties, one per `prop_delim`, with `kv_delim`
    /// between name and value.
    #[must_use]
    pub fn to_string_with(&self, prop_delim: &str, kv_delim: &str) -> String {
        let avg = |total: u64| {
            if self.num_entries == 0 {
                0.0
            } else {
                total as f64 / self.num_entries as f64
            }
        };
        let mut out = String::new();
        let mut push = |name: &str, value: String| {
            let _ = write!(out, "{}{}{}{}", name, kv_delim, value, prop_delim);
        };
        push("# data blocks", self.num_data_blocks.to_string());
        push("# entries", self.num_entries.to_string());
        push("raw key size", self.raw_key_size.to_string());
        push("raw average key size", avg(self.raw_key_size).to_string());
        push("raw value size", self.raw_value_size.to_string());
        push("raw average value size", avg(self.raw_value_size).to_string());
        push("data block size", self.data_size.to_string());
        push("index block size", self.index_size.to_string());
        push("filter block size", self.filter_size.to_string());
        push(
            "(estimated) table size",
            self.data_size
                .saturating_add(self.index_size)
                .saturating_add(self.filter_size)
                .to_string(),
        );
        let policy = if self.filter_policy_name.is_empty() {
            "N/A".to_string()
        } else {
            self.filter_policy_name.clone()
        };
        push("filter policy name", policy);
        out
    }
}

/// Reads the properties block at `handle`. Checksums are not verified.
pub fn read_properties(
    file: &dyn RandomAccessFile,
    footer: &Footer,
    handle: &BlockHandle,
) -> Result<TableProperties> {
    let block = read_block(file, footer, false, handle)?;
    TableProperties::decode(&block)
}

/// Looks up the handle of meta block `name` in a meta-index iterator.
pub fn find_meta_block(meta_iter: &mut BlockIter, name: &[u8]) -> Result<Option<BlockHandle>> {
    meta_iter.seek(name);
    meta_iter.status()?;
    if meta_iter.valid() && meta_iter.key() == name {
        return BlockHandle::decode(meta_iter.value()).map(Some);
    }
    Ok(None)
}
