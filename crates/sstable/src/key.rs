//! Internal keys, key ordering and prefix extraction.
//!
//! An internal key is `user_key | fixed64(sequence << 8 | value_type)`.
//! Internal keys sort by user key ascending, then by the packed trailer
//! descending so that newer entries for a user key come first.

use std::cmp::Ordering;

use crate::coding::decode_fixed64;

pub const MAX_SEQUENCE_NUMBER: u64 = (1 << 56) - 1;

/// Length of the packed sequence/type trailer.
pub const INTERNAL_KEY_TRAILER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Deletion,
    Value,
    Merge,
    SingleDeletion,
}

impl ValueType {
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x0 => Some(ValueType::Deletion),
            0x1 => Some(ValueType::Value),
            0x2 => Some(ValueType::Merge),
            0x7 => Some(ValueType::SingleDeletion),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            ValueType::Deletion => 0x0,
            ValueType::Value => 0x1,
            ValueType::Merge => 0x2,
            ValueType::SingleDeletion => 0x7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: u64,
    pub value_type: ValueType,
}

/// Splits an internal key. Returns `None` if the key is too short or the
/// type tag is unknown.
#[must_use]
pub fn parse_internal_key(key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if key.len() < INTERNAL_KEY_TRAILER {
        return None;
    }
    let split = key.len() - INTERNAL_KEY_TRAILER;
    let packed = decode_fixed64(&key[split..])?;
    Some(ParsedInternalKey {
        user_key: &key[..split],
        sequence: packed >> 8,
        value_type: ValueType::from_u8((packed & 0xff) as u8)?,
    })
}

/// User-key portion of an internal key. Keys shorter than the trailer are
/// returned unchanged.
#[must_use]
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    let len = internal_key.len();
    if len < INTERNAL_KEY_TRAILER {
        return internal_key;
    }
    &internal_key[..len - INTERNAL_KEY_TRAILER]
}

#[must_use]
pub fn make_internal_key(user_key: &[u8], sequence: u64, value_type: ValueType) -> Vec<u8> {
    let mut out = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER);
    out.extend_from_slice(user_key);
    let packed = (sequence << 8) | u64::from(value_type.as_u8());
    out.extend_from_slice(&packed.to_le_bytes());
    out
}

/// Ordering applied to the keys of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyComparator {
    /// Plain byte order: meta-index, properties and filter-index blocks.
    Bytewise,
    /// Internal-key order: data and index blocks.
    Internal,
}

impl KeyComparator {
    #[must_use]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyComparator::Bytewise => a.cmp(b),
            KeyComparator::Internal => {
                if a.len() < INTERNAL_KEY_TRAILER || b.len() < INTERNAL_KEY_TRAILER {
                    return a.cmp(b);
                }
                extract_user_key(a)
                    .cmp(extract_user_key(b))
                    .then_with(|| trailer(b).cmp(&trailer(a)))
            }
        }
    }
}

fn trailer(key: &[u8]) -> u64 {
    decode_fixed64(&key[key.len() - INTERNAL_KEY_TRAILER..]).unwrap_or(0)
}

/// Extracts a prefix from a user key.
///
/// Prefix filtering and hash indexes rely on three properties:
/// `key.starts_with(transform(key))`, `transform(key) <= key`, and
/// `a <= b` implies `transform(a) <= transform(b)`.
pub trait SliceTransform: Send + Sync {
    fn name(&self) -> &str;

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8];

    fn in_domain(&self, key: &[u8]) -> bool;
}

/// Takes the first `len` bytes; shorter keys are outside the domain.
#[derive(Debug, Clone)]
pub struct FixedPrefixTransform {
    len: usize,
    name: String,
}

impl FixedPrefixTransform {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            len,
            name: format!("rocksdb.FixedPrefix.{}", len),
        }
    }
}

impl SliceTransform for FixedPrefixTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        &key[..self.len.min(key.len())]
    }

    fn in_domain(&self, key: &[u8]) -> bool {
        key.len() >= self.len
    }
}
