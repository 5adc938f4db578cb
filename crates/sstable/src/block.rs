//! Sorted blocks with restart points.
//!
//! ```text
//! entry*: [shared: varint32][non_shared: varint32][value_len: varint32]
//!         [key delta: non_shared bytes][value: value_len bytes]
//! [restart offsets: u32 LE * num_restarts][num_restarts: u32 LE]
//! ```
//!
//! Keys at restart points are stored whole (`shared == 0`), which makes the
//! restart array binary-searchable.

use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::cache::CacheHandle;
use crate::coding::{decode_fixed32, get_varint32};
use crate::error::{Error, Result};
use crate::file::RandomAccessFile;
use crate::format::{read_block_contents, BlockHandle, Footer};
use crate::index::{PrefixCandidates, PrefixIndex};
use crate::iterator::InternalIterator;
use crate::key::KeyComparator;

/// A decoded, uncompressed block. Cloning shares the underlying bytes.
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    pub fn new(data: Bytes) -> Result<Self> {
        let bad = || Error::corruption("bad block contents");
        if data.len() < 4 {
            return Err(bad());
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]).ok_or_else(bad)? as usize;
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts > max_restarts {
            return Err(bad());
        }
        Ok(Self {
            restart_offset: data.len() - (1 + num_restarts) * 4,
            num_restarts,
            data,
        })
    }

    /// Size of the block contents in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes charged against a cache holding this block.
    #[must_use]
    pub fn usable_size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        self.data.len() + std::mem::size_of::<Self>()
    }

    #[must_use]
    pub fn num_restarts(&self) -> usize {
        self.num_restarts
    }

    #[must_use]
    pub fn iter(&self, cmp: KeyComparator) -> BlockIter {
        BlockIter {
            data: self.data.clone(),
            restarts: self.restart_offset,
            num_restarts: self.num_restarts,
            cmp,
            current: self.restart_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value: (self.restart_offset, 0),
            status: None,
            prefix_index: None,
            _pin: None,
        }
    }
}

/// Reads, verifies and decompresses the block at `handle`.
pub fn read_block(
    file: &dyn RandomAccessFile,
    footer: &Footer,
    verify_checksums: bool,
    handle: &BlockHandle,
) -> Result<Block> {
    let contents = read_block_contents(file, footer, verify_checksums, handle, true)?;
    Block::new(contents.data)
}

/// Cursor over one block.
///
/// Holds the block bytes by reference count, and optionally a cache handle
/// that keeps the cache entry pinned until the iterator is dropped.
pub struct BlockIter {
    data: Bytes,
    restarts: usize,
    num_restarts: usize,
    cmp: KeyComparator,
    /// Offset of the current entry; `restarts` when invalid.
    current: usize,
    restart_index: usize,
    key: Vec<u8>,
    /// (offset, len) of the current value.
    value: (usize, usize),
    status: Option<Error>,
    prefix_index: Option<Arc<PrefixIndex>>,
    _pin: Option<CacheHandle>,
}

impl BlockIter {
    /// An invalid iterator that reports `err` as its status.
    #[must_use]
    pub fn error(err: Error) -> Self {
        Self {
            data: Bytes::new(),
            restarts: 0,
            num_restarts: 0,
            cmp: KeyComparator::Bytewise,
            current: 0,
            restart_index: 0,
            key: Vec::new(),
            value: (0, 0),
            status: Some(err),
            prefix_index: None,
            _pin: None,
        }
    }

    /// Keeps `handle` alive for as long as this iterator.
    #[must_use]
    pub fn pinned(mut self, handle: Option<CacheHandle>) -> Self {
        self._pin = handle;
        self
    }

    /// Routes `seek` through a prefix index instead of a full binary search.
    #[must_use]
    pub fn with_prefix_index(mut self, index: Arc<PrefixIndex>) -> Self {
        self.prefix_index = Some(index);
        self
    }

    fn next_entry_offset(&self) -> usize {
        self.value.0 + self.value.1
    }

    fn restart_point(&self, index: usize) -> usize {
        decode_fixed32(&self.data[self.restarts + index * 4..]).unwrap_or(0) as usize
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        let offset = self.restart_point(index);
        self.value = (offset, 0);
    }

    fn invalidate(&mut self) {
        self.current = self.restarts;
        self.restart_index = self.num_restarts;
        self.key.clear();
    }

    fn corruption_error(&mut self) {
        self.invalidate();
        self.value = (self.restarts, 0);
        self.status = Some(Error::corruption("bad entry in block"));
    }

    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.restarts {
            self.invalidate();
            return false;
        }
        let Some((shared, non_shared, value_len, header)) =
            decode_entry(&self.data[self.current..self.restarts])
        else {
            self.corruption_error();
            return false;
        };
        if self.key.len() < shared {
            self.corruption_error();
            return false;
        }
        let delta = self.current + header;
        self.key.truncate(shared);
        self.key.extend_from_slice(&self.data[delta..delta + non_shared]);
        self.value = (delta + non_shared, value_len);
        while self.restart_index + 1 < self.num_restarts
            && self.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        true
    }

    /// Whole key stored at restart point `index`.
    fn restart_key(&self, index: usize) -> Option<&[u8]> {
        if index >= self.num_restarts {
            return None;
        }
        let offset = self.restart_point(index);
        if offset >= self.restarts {
            return None;
        }
        let (shared, non_shared, _, header) = decode_entry(&self.data[offset..self.restarts])?;
        if shared != 0 {
            return None;
        }
        Some(&self.data[offset + header..offset + header + non_shared])
    }

    fn compare_restart_key(&mut self, index: usize, target: &[u8]) -> Option<Ordering> {
        let ord = self.restart_key(index).map(|k| self.cmp.compare(k, target));
        if ord.is_none() {
            self.corruption_error();
        }
        ord
    }

    /// Last restart point in `[left, right]` whose key is before `target`,
    /// or `left` if there is none.
    fn binary_seek(&mut self, target: &[u8], mut left: usize, mut right: usize) -> Option<usize> {
        while left < right {
            let mid = (left + right + 1) / 2;
            if self.compare_restart_key(mid, target)? == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }
        Some(left)
    }

    /// Picks the candidate restart block that may hold `target`.
    ///
    /// `block_ids` is sorted and may contain blocks of other prefixes that
    /// share a hash bucket. If the chosen block is not adjacent to the
    /// previous candidate and the block before it already starts after
    /// `target`, the key cannot be in the table.
    fn binary_block_index_seek(&mut self, target: &[u8], block_ids: &[u32]) -> Option<usize> {
        if block_ids.is_empty() {
            return None;
        }
        let mut left = 0usize;
        let mut right = block_ids.len() - 1;
        while left <= right {
            let mid = (left + right) / 2;
            if self.compare_restart_key(block_ids[mid] as usize, target)? == Ordering::Less {
                left = mid + 1;
            } else {
                if left == right {
                    break;
                }
                right = mid;
            }
        }
        if left != right {
            return None;
        }
        let block = block_ids[left] as usize;
        if block > 0
            && (left == 0 || block_ids[left - 1] as usize != block - 1)
            && self.compare_restart_key(block - 1, target)? == Ordering::Greater
        {
            return None;
        }
        Some(block)
    }

    fn locate_restart(&mut self, target: &[u8]) -> Option<usize> {
        if self.num_restarts == 0 {
            return None;
        }
        if let Some(index) = self.prefix_index.clone() {
            match index.candidates(target) {
                Some(PrefixCandidates::Range { first, count }) => {
                    if count == 0 {
                        return None;
                    }
                    let first = first as usize;
                    let last = (first + count as usize - 1).min(self.num_restarts - 1);
                    return self.binary_seek(target, first.min(last), last);
                }
                Some(PrefixCandidates::Blocks(ids)) => {
                    return self.binary_block_index_seek(target, ids);
                }
                None => {}
            }
        }
        self.binary_seek(target, 0, self.num_restarts - 1)
    }
}

/// Decodes an entry header, checking that the key delta and value fit.
fn decode_entry(buf: &[u8]) -> Option<(usize, usize, usize, usize)> {
    let (shared, n1) = get_varint32(buf)?;
    let (non_shared, n2) = get_varint32(&buf[n1..])?;
    let (value_len, n3) = get_varint32(&buf[n1 + n2..])?;
    let header = n1 + n2 + n3;
    let (non_shared, value_len) = (non_shared as usize, value_len as usize);
    if buf.len() - header < non_shared + value_len {
        return None;
    }
    Some((shared as usize, non_shared, value_len, header))
}

impl InternalIterator for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.restarts
    }

    fn seek_to_first(&mut self) {
        if self.num_restarts == 0 {
            self.invalidate();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        if self.num_restarts == 0 {
            self.invalidate();
            return;
        }
        self.seek_to_restart_point(self.num_restarts - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.restarts {}
    }

    fn seek(&mut self, target: &[u8]) {
        let Some(index) = self.locate_restart(target) else {
            self.invalidate();
            return;
        };
        self.seek_to_restart_point(index);
        while self.parse_next_key() {
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let original = self.current;
        while self.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.invalidate();
                return;
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.data[self.value.0..self.value.0 + self.value.1]
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::BlockBuilder;

    fn build(interval: usize, n: usize) -> Block {
        let mut b = BlockBuilder::new(interval);
        for i in 0..n {
            b.add(format!("key{:04}", i).as_bytes(), format!("v{}", i).as_bytes());
        }
        Block::new(Bytes::from(b.finish())).unwrap()
    }

    fn collect_forward(it: &mut BlockIter) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        it.seek_to_first();
        while it.valid() {
            out.push(it.key().to_vec());
            it.next();
        }
        out
    }

    #[test]
    fn forward_and_backward_scans_agree() {
        let block = build(4, 37);
        let mut it = block.iter(KeyComparator::Bytewise);
        let forward = collect_forward(&mut it);
        assert_eq!(forward.len(), 37);

        let mut backward = Vec::new();
        it.seek_to_last();
        while it.valid() {
            backward.push(it.key().to_vec());
            it.prev();
        }
        backward.reverse();
        assert_eq!(forward, backward);
        assert!(it.status().is_ok());
    }

    #[test]
    fn seek_lands_on_first_key_at_or_after_target() {
        let block = build(3, 20);
        let mut it = block.iter(KeyComparator::Bytewise);
        it.seek(b"key0007");
        assert_eq!(it.key(), b"key0007");
        assert_eq!(it.value(), b"v7");
        it.seek(b"key0007x");
        assert_eq!(it.key(), b"key0008");
        it.seek(b"a");
        assert_eq!(it.key(), b"key0000");
        it.seek(b"z");
        assert!(!it.valid());
    }

    #[test]
    fn empty_block_is_never_valid() {
        let block = Block::new(Bytes::from(BlockBuilder::new(16).finish())).unwrap();
        let mut it = block.iter(KeyComparator::Bytewise);
        it.seek_to_first();
        assert!(!it.valid());
        it.seek(b"x");
        assert!(!it.valid());
        assert!(it.status().is_ok());
    }

    #[test]
    fn restart_count_overflow_is_rejected() {
        let mut raw = vec![0u8; 8];
        raw.extend_from_slice(&100u32.to_le_bytes());
        assert!(Block::new(Bytes::from(raw)).unwrap_err().is_corruption());
        assert!(Block::new(Bytes::from_static(&[1, 2])).is_err());
    }

    #[test]
    fn garbage_entry_reports_corruption() {
        // One restart at offset 0 pointing at an entry whose lengths overrun.
        let mut raw = vec![0u8, 50, 50];
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&1u32.to_le_bytes());
        let block = Block::new(Bytes::from(raw)).unwrap();
        let mut it = block.iter(KeyComparator::Bytewise);
        it.seek_to_first();
        assert!(!it.valid());
        assert!(it.status().unwrap_err().is_corruption());
    }
}
