//! Table file format: block handles, the footer and block trailers.
//!
//! ## Legacy footer (48 bytes), magic `0xdb4775248b80fb57`
//!
//! ```text
//! [metaindex handle][index handle][zero padding to 40][magic: u64 LE]
//! ```
//!
//! ## Current footer (53 bytes), magic `0x88e241b785f4cff7`
//!
//! ```text
//! [checksum type: u8][metaindex handle][index handle][zero padding to 41]
//! [version: u32 LE][magic: u64 LE]
//! ```
//!
//! Handles are two varint64s (offset, size). Every block is followed by a
//! 5-byte trailer: `[compression type: u8][checksum: u32 LE]`, the checksum
//! covering the block bytes plus the compression byte.

use bytes::Bytes;
use std::fmt;

use crate::coding::{decode_fixed32, decode_fixed64, get_varint64, put_varint64};
use crate::compress::{uncompress, CompressionType};
use crate::error::{Error, Result};
use crate::file::RandomAccessFile;

/// Magic number of footers written with the legacy layout (version 0).
pub const LEGACY_TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;
/// Magic number of versioned footers.
pub const TABLE_MAGIC: u64 = 0x88e2_41b7_85f4_cff7;

pub const LEGACY_FOOTER_SIZE: usize = 2 * BlockHandle::MAX_ENCODED_LEN + 8;
pub const FOOTER_SIZE: usize = 1 + 2 * BlockHandle::MAX_ENCODED_LEN + 4 + 8;

/// Newest footer version this reader understands.
pub const MAX_SUPPORTED_VERSION: u32 = 2;

/// Compression byte + fixed32 checksum.
pub const BLOCK_TRAILER_SIZE: usize = 5;

const CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// Byte range of a block within a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    /// Two varint64s of at most ten bytes each.
    pub const MAX_ENCODED_LEN: usize = 20;

    /// Stands in for "no block", e.g. a key past the last filter segment.
    pub const NULL: BlockHandle = BlockHandle { offset: 0, size: 0 };

    #[must_use]
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.offset == 0 && self.size == 0
    }

    /// Decodes a handle from the front of `input`, returning it and the
    /// number of bytes consumed. Trailing bytes are left for the caller.
    pub fn decode_from(input: &[u8]) -> Result<(Self, usize)> {
        let bad = || Error::corruption("bad block handle");
        let (offset, n1) = get_varint64(input).ok_or_else(bad)?;
        let (size, n2) = get_varint64(&input[n1..]).ok_or_else(bad)?;
        Ok((Self { offset, size }, n1 + n2))
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        Self::decode_from(input).map(|(h, _)| h)
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::MAX_ENCODED_LEN);
        self.encode_to(&mut out);
        out
    }
}

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset={} size={}", self.offset, self.size)
    }
}

/// Checksum algorithm protecting block contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    None,
    Crc32c,
    XxHash,
}

impl ChecksumType {
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ChecksumType::None),
            1 => Ok(ChecksumType::Crc32c),
            2 => Ok(ChecksumType::XxHash),
            other => Err(Error::corruption(format!("unknown checksum type {}", other))),
        }
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            ChecksumType::None => 0,
            ChecksumType::Crc32c => 1,
            ChecksumType::XxHash => 2,
        }
    }

    /// Checksum as stored in a block trailer for `data` followed by the
    /// compression byte `tag`. CRC32C values are stored masked.
    #[must_use]
    pub fn compute(self, data: &[u8], tag: u8) -> u32 {
        match self {
            ChecksumType::None => 0,
            ChecksumType::Crc32c => {
                mask_crc(crc32c::crc32c_append(crc32c::crc32c(data), &[tag]))
            }
            ChecksumType::XxHash => {
                let mut h = xxhash_rust::xxh32::Xxh32::new(0);
                h.update(data);
                h.update(&[tag]);
                h.digest()
            }
        }
    }
}

#[inline]
#[must_use]
pub const fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(CRC_MASK_DELTA)
}

#[inline]
#[must_use]
pub const fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(CRC_MASK_DELTA).rotate_left(15)
}

/// Parsed table trailer. Immutable once read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    version: u32,
    checksum: ChecksumType,
    metaindex_handle: BlockHandle,
    index_handle: BlockHandle,
}

impl Footer {
    #[must_use]
    pub fn new(
        version: u32,
        checksum: ChecksumType,
        metaindex_handle: BlockHandle,
        index_handle: BlockHandle,
    ) -> Self {
        Self {
            version,
            checksum,
            metaindex_handle,
            index_handle,
        }
    }

    /// Decodes a footer from the tail of a file. `tail` may hold more bytes
    /// than the footer; only its suffix is used.
    ///
    /// # Errors
    ///
    /// `Corruption` for a short tail, a bad magic number or undecodable
    /// handles; `UnknownVersion` for versions newer than this reader.
    pub fn decode(tail: &[u8]) -> Result<Self> {
        if tail.len() < LEGACY_FOOTER_SIZE {
            return Err(Error::corruption("file is too short to be a table"));
        }
        let magic = decode_fixed64(&tail[tail.len() - 8..])
            .ok_or_else(|| Error::corruption("missing table magic"))?;

        let (version, checksum, handles) = match magic {
            LEGACY_TABLE_MAGIC => {
                let footer = &tail[tail.len() - LEGACY_FOOTER_SIZE..];
                (0, ChecksumType::Crc32c, &footer[..LEGACY_FOOTER_SIZE - 8])
            }
            TABLE_MAGIC => {
                if tail.len() < FOOTER_SIZE {
                    return Err(Error::corruption("file is too short to be a table"));
                }
                let footer = &tail[tail.len() - FOOTER_SIZE..];
                let checksum = ChecksumType::from_u8(footer[0])?;
                let version = decode_fixed32(&footer[FOOTER_SIZE - 12..])
                    .ok_or_else(|| Error::corruption("missing footer version"))?;
                (version, checksum, &footer[1..FOOTER_SIZE - 12])
            }
            other => {
                return Err(Error::corruption(format!(
                    "bad table magic number {:#x}",
                    other
                )))
            }
        };

        if version > MAX_SUPPORTED_VERSION {
            return Err(Error::UnknownVersion(version));
        }

        let (metaindex_handle, n) = BlockHandle::decode_from(handles)?;
        let (index_handle, _) = BlockHandle::decode_from(&handles[n..])?;
        Ok(Self {
            version,
            checksum,
            metaindex_handle,
            index_handle,
        })
    }

    /// Reads and decodes the footer of `file`. Touches only the trailer.
    pub fn read_from(file: &dyn RandomAccessFile, file_size: u64) -> Result<Self> {
        let read_len = (FOOTER_SIZE as u64).min(file_size);
        let tail = file.read_at(file_size - read_len, read_len as usize)?;
        Self::decode(&tail)
    }

    /// Serializes the footer. Version 0 produces the legacy layout.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FOOTER_SIZE);
        if self.version == 0 {
            self.metaindex_handle.encode_to(&mut out);
            self.index_handle.encode_to(&mut out);
            out.resize(LEGACY_FOOTER_SIZE - 8, 0);
            out.extend_from_slice(&LEGACY_TABLE_MAGIC.to_le_bytes());
        } else {
            out.push(self.checksum.as_u8());
            self.metaindex_handle.encode_to(&mut out);
            self.index_handle.encode_to(&mut out);
            out.resize(FOOTER_SIZE - 12, 0);
            out.extend_from_slice(&self.version.to_le_bytes());
            out.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        }
        out
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn checksum(&self) -> ChecksumType {
        self.checksum
    }

    #[must_use]
    pub fn metaindex_handle(&self) -> BlockHandle {
        self.metaindex_handle
    }

    #[must_use]
    pub fn index_handle(&self) -> BlockHandle {
        self.index_handle
    }
}

impl fmt::Display for Footer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "metaindex handle: {}\n  index handle: {}\n  footer version: {}\n  checksum: {:?}",
            self.metaindex_handle, self.index_handle, self.version, self.checksum
        )
    }
}

/// Raw bytes of one block, with the compression they are still in.
#[derive(Debug, Clone)]
pub struct BlockContents {
    pub data: Bytes,
    pub compression: CompressionType,
}

/// Reads the block at `handle`, optionally verifying its trailer checksum
/// and decompressing it.
///
/// With `decompress == false` a compressed block comes back as-is, tagged
/// with its compression type, ready for the compressed block cache.
pub fn read_block_contents(
    file: &dyn RandomAccessFile,
    footer: &Footer,
    verify_checksums: bool,
    handle: &BlockHandle,
    decompress: bool,
) -> Result<BlockContents> {
    let n = usize::try_from(handle.size)
        .map_err(|_| Error::corruption("block size overflows usize"))?;
    let expected = n
        .checked_add(BLOCK_TRAILER_SIZE)
        .ok_or_else(|| Error::corruption("block size overflows usize"))?;
    let end = handle.offset.checked_add(expected as u64);
    if end.map_or(true, |end| end > file.size()) {
        return Err(Error::corruption(format!(
            "block at offset {} with size {} extends past the end of the file ({} bytes)",
            handle.offset,
            handle.size,
            file.size()
        )));
    }
    let raw = file.read_at(handle.offset, expected)?;
    if raw.len() != expected {
        return Err(Error::corruption(format!(
            "truncated block read at offset {}: got {} of {} bytes",
            handle.offset,
            raw.len(),
            expected
        )));
    }

    let tag = raw[n];
    if verify_checksums && footer.checksum() != ChecksumType::None {
        let stored = decode_fixed32(&raw[n + 1..])
            .ok_or_else(|| Error::corruption("missing block checksum"))?;
        let actual = footer.checksum().compute(&raw[..n], tag);
        if stored != actual {
            return Err(Error::corruption(format!(
                "block checksum mismatch at offset {}",
                handle.offset
            )));
        }
    }

    let compression = CompressionType::from_u8(tag)?;
    let data = raw.slice(..n);
    if decompress && compression != CompressionType::None {
        return Ok(BlockContents {
            data: uncompress(&data, compression, footer.version())?,
            compression: CompressionType::None,
        });
    }
    Ok(BlockContents { data, compression })
}
