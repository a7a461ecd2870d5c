//! Simple-8b: packs runs of small non-negative integers into 64-bit words,
//! each word self-describing via a 4-bit selector in its top bits.
//!
//! Grounded on the teacher's `encoding::simple8b_encoder` module, which
//! implements the same 16-selector table (reproduced below) with one
//! hand-written pack/unpack function pair per selector; this version keeps
//! the selector table but packs/unpacks generically, since the per-selector
//! functions added no information the table doesn't already carry.

use crate::error::CodecError;

pub const MAX_VALUE: u64 = (1 << 60) - 1;

/// `(values_per_word, bits_per_value)`, ordered from widest run to narrowest,
/// matching the teacher's `SELECTOR` table exactly.
const SELECTOR: [(usize, u32); 16] = [
    (240, 0),
    (120, 0),
    (60, 1),
    (30, 2),
    (20, 3),
    (15, 4),
    (12, 5),
    (10, 6),
    (8, 7),
    (7, 8),
    (6, 10),
    (5, 12),
    (4, 15),
    (3, 20),
    (2, 30),
    (1, 60),
];

fn can_pack(src: &[u64], n: usize, bits: u32) -> bool {
    if src.len() < n {
        return false;
    }
    if bits == 0 {
        src[..n].iter().all(|&v| v == 0)
    } else {
        let max = (1u64 << bits) - 1;
        src[..n].iter().all(|&v| v <= max)
    }
}

fn pack(src: &[u64], sel: usize) -> u64 {
    let (n, bits) = SELECTOR[sel];
    let mut word = (sel as u64) << 60;
    if bits > 0 {
        for (i, &v) in src[..n].iter().enumerate() {
            word |= v << (i as u32 * bits);
        }
    }
    word
}

fn unpack_into(sel: usize, word: u64, dst: &mut Vec<u64>) -> Result<(), CodecError> {
    if sel >= SELECTOR.len() {
        return Err(CodecError::OutOfRange(format!("simple8b selector {sel}")));
    }
    let (n, bits) = SELECTOR[sel];
    if bits == 0 {
        dst.resize(dst.len() + n, 0);
    } else {
        let mask = (1u64 << bits) - 1;
        for i in 0..n {
            dst.push((word >> (i as u32 * bits)) & mask);
        }
    }
    Ok(())
}

/// Packs as many values from the front of `src` into one word as possible.
/// Returns `(word, consumed)`.
fn encode_one(src: &[u64]) -> Result<(u64, usize), CodecError> {
    for sel in 0..SELECTOR.len() {
        let (n, bits) = SELECTOR[sel];
        if can_pack(src, n, bits) {
            return Ok((pack(src, sel), n));
        }
    }
    if let Some(&v) = src.first() {
        Err(CodecError::OutOfRange(format!(
            "value {v} exceeds simple8b maximum {MAX_VALUE}"
        )))
    } else {
        Ok((0, 0))
    }
}

pub fn encode_all(src: &[u64]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let (word, n) = encode_one(&src[i..])?;
        out.extend_from_slice(&word.to_be_bytes());
        i += n;
    }
    Ok(out)
}

pub fn decode_all(bytes: &[u8]) -> Result<Vec<u64>, CodecError> {
    if bytes.len() % 8 != 0 {
        return Err(CodecError::Truncated);
    }
    let mut out = Vec::with_capacity(bytes.len() / 8 * 60);
    for chunk in bytes.chunks_exact(8) {
        let word = u64::from_be_bytes(chunk.try_into().unwrap());
        let sel = (word >> 60) as usize;
        unpack_into(sel, word, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_values() {
        let values: Vec<u64> = (0..1000).map(|i| (i % 13) as u64).collect();
        let encoded = encode_all(&values).unwrap();
        let decoded = decode_all(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn round_trips_all_zero_run() {
        let values = vec![0u64; 500];
        let encoded = encode_all(&values).unwrap();
        let decoded = decode_all(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn rejects_value_over_max() {
        let values = vec![MAX_VALUE + 1];
        assert!(encode_all(&values).is_err());
    }

    #[test]
    fn encodes_more_compactly_than_plain_for_small_values() {
        let values: Vec<u64> = vec![1; 2000];
        let encoded = encode_all(&values).unwrap();
        assert!(encoded.len() < values.len() * 8);
    }
}
