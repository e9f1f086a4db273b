use super::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashSet;
use std::io::Cursor;

// -------------------- Construction --------------------

#[test]
fn new_creates_valid_filter() {
    let bf = BloomFilter::new(100, 0.2);
    assert!(bf.num_bits() > 0);
    assert!(bf.num_hashes() > 0);
    assert!(!bf.bits.is_empty());
}

#[test]
fn sizing_follows_closed_form() {
    // n = 1000, p = 0.2: m = ceil(1000 * 1.6094 / 0.4805) = 3350, k = ceil(3.35 * 0.6931) = 3
    let bf = BloomFilter::new(1000, 0.2);
    assert_eq!(bf.num_bits(), 3350);
    assert_eq!(bf.num_hashes(), 3);
}

#[test]
#[should_panic(expected = "expected_items must be > 0")]
fn new_panics_on_zero_items() {
    BloomFilter::new(0, 0.2);
}

#[test]
#[should_panic(expected = "false_positive_rate must be in (0, 1)")]
fn new_panics_on_zero_fpr() {
    BloomFilter::new(100, 0.0);
}

#[test]
#[should_panic(expected = "false_positive_rate must be in (0, 1)")]
fn new_panics_on_one_fpr() {
    BloomFilter::new(100, 1.0);
}

// -------------------- Insert / Contains --------------------

#[test]
fn inserted_key_is_found() {
    let mut bf = BloomFilter::new(100, 0.2);
    bf.insert(b"hello");
    assert!(bf.may_contain(b"hello"));
}

#[test]
fn missing_key_is_not_found() {
    let bf = BloomFilter::new(100, 0.2);
    assert!(!bf.may_contain(b"hello"));
}

#[test]
fn no_false_negatives() {
    let keys: Vec<[u8; 8]> = (0..10_000u64).map(|i| i.to_le_bytes()).collect();
    let bf = BloomFilter::from_keys(keys.iter().map(|k| &k[..]), keys.len(), 0.2);
    for k in &keys {
        assert!(bf.may_contain(k));
    }
}

#[test]
fn random_non_members_stay_within_twice_target() {
    let n = 10_000u64;
    let fpr = 0.2;
    let mut bf = BloomFilter::new(n as usize, fpr);
    let members: HashSet<u64> = (0..n).collect();
    for i in 0..n {
        bf.insert(&i.to_le_bytes());
    }

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut tested = 0;
    let mut false_positives = 0;
    while tested < 10_000 {
        let candidate: u64 = rng.gen();
        if members.contains(&candidate) {
            continue;
        }
        tested += 1;
        if bf.may_contain(&candidate.to_le_bytes()) {
            false_positives += 1;
        }
    }

    let actual = false_positives as f64 / tested as f64;
    assert!(
        actual <= fpr * 2.0,
        "FPR too high: {:.4} (target {:.4})",
        actual,
        fpr
    );
}

#[test]
fn sequential_fixed_width_keys_spread() {
    // Dense integer keys are the common case for numeric stores.
    let mut bf = BloomFilter::new(5_000, 0.2);
    for i in 0..5_000u32 {
        bf.insert(&i.to_le_bytes());
    }
    let mut fp = 0;
    for i in 5_000..15_000u32 {
        if bf.may_contain(&i.to_le_bytes()) {
            fp += 1;
        }
    }
    assert!(fp < 4_000, "false positives: {}", fp);
}

#[test]
fn empty_key() {
    let mut bf = BloomFilter::new(10, 0.2);
    bf.insert(b"");
    assert!(bf.may_contain(b""));
}

// -------------------- Text form --------------------

#[test]
fn text_roundtrip_preserves_bits() {
    let mut bf = BloomFilter::new(500, 0.2);
    for i in 0..500u64 {
        bf.insert(&i.to_le_bytes());
    }

    let mut buf = Vec::new();
    bf.write_to(&mut buf).unwrap();

    let bf2 = BloomFilter::read_from(&mut Cursor::new(&buf)).unwrap();
    assert_eq!(bf2.num_bits(), bf.num_bits());
    assert_eq!(bf2.num_hashes(), bf.num_hashes());
    assert_eq!(bf2.bits, bf.bits);
    assert_eq!(bf2.count_ones(), bf.count_ones());
    for i in 0..500u64 {
        assert!(bf2.may_contain(&i.to_le_bytes()), "key {} missing", i);
    }
}

#[test]
fn text_form_layout() {
    let mut bf = BloomFilter::new(1, 0.5);
    bf.insert(b"x");
    let mut buf = Vec::new();
    bf.write_to(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), bf.num_hashes().to_string());
    let bits: Vec<&str> = lines.next().unwrap().split(',').collect();
    assert_eq!(bits.len() as u64, bf.num_bits());
    assert!(bits.iter().all(|b| *b == "0" || *b == "1"));
}

#[test]
fn read_rejects_garbage() {
    assert!(BloomFilter::read_from(&mut Cursor::new(b"abc\n0,1\n")).is_err());
    assert!(BloomFilter::read_from(&mut Cursor::new(b"3\n0,2,1\n")).is_err());
    assert!(BloomFilter::read_from(&mut Cursor::new(b"3\n\n")).is_err());
    assert!(BloomFilter::read_from(&mut Cursor::new(b"0\n1,1\n")).is_err());
}

// -------------------- Debug --------------------

#[test]
fn debug_impl_works() {
    let bf = BloomFilter::new(100, 0.2);
    let debug = format!("{:?}", bf);
    assert!(debug.contains("BloomFilter"));
    assert!(debug.contains("num_hashes"));
}
