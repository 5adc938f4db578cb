//! Block decompression.
//!
//! Compressed block payloads carry the decompressed length in front of the
//! codec output: a varint32 for format version 2 and later, a fixed64 for
//! older files. LZ4 and LZ4HC share a decoder.

use bytes::Bytes;

use crate::coding::{decode_fixed64, get_varint32};
use crate::error::{Error, Result};

/// Largest decompressed block accepted. Guards allocations driven by a
/// corrupt length prefix.
pub const MAX_UNCOMPRESSED_BLOCK: usize = 256 * 1024 * 1024;

/// Compression tag stored in each block trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lz4,
    Lz4hc,
    Zstd,
}

impl CompressionType {
    /// Maps a trailer byte to a codec. Codecs this reader was not built with
    /// are reported as `NotSupported`.
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0x0 => Ok(CompressionType::None),
            0x4 => Ok(CompressionType::Lz4),
            0x5 => Ok(CompressionType::Lz4hc),
            0x7 => Ok(CompressionType::Zstd),
            other => Err(Error::NotSupported(format!(
                "block compression type {:#x}",
                other
            ))),
        }
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            CompressionType::None => 0x0,
            CompressionType::Lz4 => 0x4,
            CompressionType::Lz4hc => 0x5,
            CompressionType::Zstd => 0x7,
        }
    }
}

/// Splits the declared decompressed length off a compressed payload.
fn split_length_prefix(data: &[u8], format_version: u32) -> Result<(usize, &[u8])> {
    let (len, header) = if format_version >= 2 {
        let (len, n) = get_varint32(data)
            .ok_or_else(|| Error::corruption("bad decompressed length prefix"))?;
        (len as usize, n)
    } else {
        let len = decode_fixed64(data)
            .ok_or_else(|| Error::corruption("bad decompressed length prefix"))?;
        let len = usize::try_from(len)
            .map_err(|_| Error::corruption("decompressed length overflows usize"))?;
        (len, 8)
    };
    if len > MAX_UNCOMPRESSED_BLOCK {
        return Err(Error::corruption(format!(
            "declared block size {} exceeds limit",
            len
        )));
    }
    Ok((len, &data[header..]))
}

/// Decompresses a block payload. The result is trusted only after the codec
/// produced exactly the declared number of bytes.
pub fn uncompress(data: &[u8], compression: CompressionType, format_version: u32) -> Result<Bytes> {
    let (len, payload) = match compression {
        CompressionType::None => return Ok(Bytes::copy_from_slice(data)),
        _ => split_length_prefix(data, format_version)?,
    };
    let out = match compression {
        CompressionType::None => payload.to_vec(),
        CompressionType::Lz4 | CompressionType::Lz4hc => {
            let size = i32::try_from(len)
                .map_err(|_| Error::corruption("lz4 block too large"))?;
            lz4::block::decompress(payload, Some(size))
                .map_err(|e| Error::corruption(format!("lz4 decompression failed: {}", e)))?
        }
        CompressionType::Zstd => zstd::bulk::decompress(payload, len)
            .map_err(|e| Error::corruption(format!("zstd decompression failed: {}", e)))?,
    };
    if out.len() != len {
        return Err(Error::corruption(format!(
            "decompressed {} bytes, expected {}",
            out.len(),
            len
        )));
    }
    Ok(Bytes::from(out))
}
