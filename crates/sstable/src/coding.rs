//! Integer coding helpers: LEB128 varints and little-endian fixed-width
//! integers, as laid out in table files.

use byteorder::{ByteOrder, LittleEndian};
use integer_encoding::VarInt;

/// Longest possible varint64 encoding.
pub const MAX_VARINT64_LEN: usize = 10;

/// Decodes a varint64 from the front of `input`, returning the value and the
/// number of bytes consumed.
pub fn get_varint64(input: &[u8]) -> Option<(u64, usize)> {
    u64::decode_var(input)
}

/// Decodes a varint32 from the front of `input`.
pub fn get_varint32(input: &[u8]) -> Option<(u32, usize)> {
    let (v, n) = u64::decode_var(input)?;
    u32::try_from(v).ok().map(|v| (v, n))
}

pub fn put_varint64(dst: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; MAX_VARINT64_LEN];
    let n = value.encode_var(&mut buf);
    dst.extend_from_slice(&buf[..n]);
}

/// Reads a little-endian u32. Returns `None` if fewer than four bytes remain.
pub fn decode_fixed32(input: &[u8]) -> Option<u32> {
    (input.len() >= 4).then(|| LittleEndian::read_u32(input))
}

/// Reads a little-endian u64. Returns `None` if fewer than eight bytes remain.
pub fn decode_fixed64(input: &[u8]) -> Option<u64> {
    (input.len() >= 8).then(|| LittleEndian::read_u64(input))
}
