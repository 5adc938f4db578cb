use super::*;
use std::io::Cursor;

// -------------------- Construction --------------------

#[test]
fn new_creates_valid_filter() {
    let bf = BloomFilter::new(100, 0.01);
    assert!(bf.num_bits() > 0);
    assert!(bf.num_hashes() > 0);
    assert!(!bf.bits.is_empty());
}

#[test]
#[should_panic(expected = "expected_items must be > 0")]
fn new_panics_on_zero_items() {
    BloomFilter::new(0, 0.01);
}

#[test]
#[should_panic(expected = "false_positive_rate must be in (0, 1)")]
fn new_panics_on_one_fpr() {
    BloomFilter::new(100, 1.0);
}

#[test]
fn bits_per_key_sizing() {
    let bf = BloomFilter::with_bits_per_key(100, 10);
    assert_eq!(bf.num_bits(), 1000);
    assert_eq!(bf.num_hashes(), 7);

    // Degenerate inputs are clamped instead of panicking.
    let tiny = BloomFilter::with_bits_per_key(0, 0);
    assert!(tiny.num_bits() >= 8);
    assert!(tiny.num_hashes() >= 1);
}

// -------------------- Insert / Contains --------------------

#[test]
fn inserted_key_is_found() {
    let mut bf = BloomFilter::new(100, 0.01);
    bf.insert(b"hello");
    assert!(bf.may_contain(b"hello"));
}

#[test]
fn missing_key_is_not_found() {
    let bf = BloomFilter::new(100, 0.01);
    assert!(!bf.may_contain(b"hello"));
}

#[test]
fn many_keys_all_found() {
    let mut bf = BloomFilter::with_bits_per_key(1000, 10);
    for i in 0..1000u64 {
        bf.insert(&i.to_le_bytes());
    }
    for i in 0..1000u64 {
        assert!(bf.may_contain(&i.to_le_bytes()), "key {} should be found", i);
    }
}

#[test]
fn false_positive_rate_is_reasonable() {
    let n = 10_000;
    let fpr = 0.01;
    let mut bf = BloomFilter::new(n, fpr);
    for i in 0..n as u64 {
        bf.insert(&i.to_le_bytes());
    }

    let test_count = 10_000u64;
    let false_positives = (n as u64..n as u64 + test_count)
        .filter(|i| bf.may_contain(&i.to_le_bytes()))
        .count();

    let actual_fpr = false_positives as f64 / test_count as f64;
    // Allow up to 3x the target FPR (statistical variance)
    assert!(actual_fpr < fpr * 3.0, "FPR too high: {:.4} (target {:.4})", actual_fpr, fpr);
}

#[test]
fn empty_and_binary_keys() {
    let mut bf = BloomFilter::new(10, 0.01);
    let key = vec![0u8, 1, 2, 255, 254, 253];
    bf.insert(b"");
    bf.insert(&key);
    assert!(bf.may_contain(b""));
    assert!(bf.may_contain(&key));
}

// -------------------- Serialization --------------------

#[test]
fn bytes_roundtrip_keeps_members() {
    let mut bf = BloomFilter::new(500, 0.01);
    for i in 0..500u64 {
        bf.insert(&i.to_le_bytes());
    }

    let buf = bf.to_bytes();
    assert_eq!(buf.len(), bf.serialized_size());

    let bf2 = BloomFilter::from_bytes(&buf).unwrap();
    assert_eq!(bf2, bf);
    for i in 0..500u64 {
        assert!(bf2.may_contain(&i.to_le_bytes()), "key {} missing after roundtrip", i);
    }
}

#[test]
fn reader_roundtrip_matches_slice_decode() {
    let mut bf = BloomFilter::new(50, 0.05);
    bf.insert(b"k");
    let mut buf = Vec::new();
    bf.write_to(&mut buf).unwrap();

    let mut cursor = Cursor::new(&buf);
    let from_reader = BloomFilter::read_from(&mut cursor).unwrap();
    assert_eq!(from_reader, BloomFilter::from_bytes(&buf).unwrap());
}

#[test]
fn decode_rejects_short_header() {
    let err = BloomFilter::from_bytes(&[0u8; 10]).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
}

#[test]
fn decode_rejects_trailing_bytes() {
    let mut buf = BloomFilter::new(10, 0.01).to_bytes();
    buf.push(0);
    assert!(BloomFilter::from_bytes(&buf).is_err());
}

#[test]
fn decode_rejects_bit_count_overflow() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&1024u64.to_le_bytes()); // num_bits
    buf.extend_from_slice(&3u32.to_le_bytes());
    buf.extend_from_slice(&4u32.to_le_bytes()); // only 32 bits of storage
    buf.extend_from_slice(&[0u8; 4]);
    assert!(BloomFilter::from_bytes(&buf).is_err());
}

#[test]
fn decode_rejects_oversized_bloom() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&64u64.to_le_bytes());
    buf.extend_from_slice(&3u32.to_le_bytes());
    buf.extend_from_slice(&(256 * 1024 * 1024u32).to_le_bytes());

    let mut cursor = Cursor::new(&buf);
    assert!(BloomFilter::read_from(&mut cursor).is_err());
    assert!(BloomFilter::from_bytes(&buf).is_err());
}

#[test]
fn zero_bit_filter_matches_everything() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&2u32.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    let bf = BloomFilter::from_bytes(&buf).unwrap();
    assert!(bf.may_contain(b"anything"));
}

// -------------------- Debug --------------------

#[test]
fn debug_impl_works() {
    let bf = BloomFilter::new(100, 0.01);
    let debug = format!("{:?}", bf);
    assert!(debug.contains("BloomFilter"));
    assert!(debug.contains("num_bits"));
    assert!(debug.contains("num_hashes"));
}

#[test]
fn memory_usage_covers_bit_array() {
    let bf = BloomFilter::new(1000, 0.01);
    assert!(bf.approximate_memory_usage() >= bf.bits.len());
}
