//! FLOAT64 column codec: SAME / GORILLA+ZSTD / PLAIN (spec.md §4.A).

use crate::codec::gorilla::{GorillaDecoder, GorillaEncoder};
use crate::codec::{FLOAT_GORILLA_ZSTD, FLOAT_PLAIN, FLOAT_SAME, ZSTD_LEVEL};
use crate::error::CodecError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

pub fn encode_block(values: &[f64]) -> Result<Vec<u8>, CodecError> {
    debug_assert!(!values.is_empty());

    let first = values[0];
    if values.iter().all(|&v| v == first) {
        let mut out = vec![FLOAT_SAME];
        out.write_f64::<LittleEndian>(first).unwrap();
        return Ok(out);
    }

    let mut enc = GorillaEncoder::new();
    let mut ok = true;
    for &v in values {
        if enc.write(v).is_err() {
            ok = false;
            break;
        }
    }

    if ok {
        let gorilla_bytes = enc.into_bytes();
        let compressed = zstd::stream::encode_all(gorilla_bytes.as_slice(), ZSTD_LEVEL)
            .map_err(CodecError::Zstd)?;
        if compressed.len() + 1 < values.len() * 8 {
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(FLOAT_GORILLA_ZSTD);
            out.extend_from_slice(&compressed);
            return Ok(out);
        }
    }

    let mut out = Vec::with_capacity(1 + values.len() * 8);
    out.push(FLOAT_PLAIN);
    for &v in values {
        out.write_f64::<LittleEndian>(v).unwrap();
    }
    Ok(out)
}

pub fn decode_block(block: &[u8], count: usize) -> Result<Vec<f64>, CodecError> {
    let (&tag, rest) = block.split_first().ok_or(CodecError::Truncated)?;

    match tag {
        FLOAT_SAME => {
            let v = (&rest[..8]).read_f64::<LittleEndian>().map_err(|_| CodecError::Truncated)?;
            Ok(vec![v; count])
        }
        FLOAT_GORILLA_ZSTD => {
            let gorilla_bytes = zstd::stream::decode_all(rest).map_err(CodecError::Zstd)?;
            let mut dec = GorillaDecoder::new(&gorilla_bytes);
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(dec.next()?);
            }
            Ok(out)
        }
        FLOAT_PLAIN => {
            if rest.len() != count * 8 {
                return Err(CodecError::LengthMismatch {
                    expected: count * 8,
                    actual: rest.len(),
                });
            }
            let mut out = Vec::with_capacity(count);
            let mut cursor = rest;
            for _ in 0..count {
                out.push(cursor.read_f64::<LittleEndian>().unwrap());
            }
            Ok(out)
        }
        other => Err(CodecError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(values: &[f64]) -> Vec<f64> {
        let block = encode_block(values).unwrap();
        decode_block(&block, values.len()).unwrap()
    }

    #[test]
    fn same_path() {
        let values = vec![3.5f64; 2000];
        let block = encode_block(&values).unwrap();
        assert_eq!(block[0], FLOAT_SAME);
        assert_eq!(round_trip(&values), values);
    }

    #[test]
    fn gorilla_path_for_varying_values() {
        let values: Vec<f64> = (0..2000).map(|i| (i as f64).sin()).collect();
        let block = encode_block(&values).unwrap();
        assert_eq!(block[0], FLOAT_GORILLA_ZSTD);
        assert_eq!(round_trip(&values), values);
    }

    #[test]
    fn plain_fallback_for_incompressible_bits() {
        let values: Vec<f64> = (0..2000).map(|i| f64::from_bits((i as u64) * 0x9E3779B97F4A7C15)).collect();
        assert_eq!(round_trip(&values), values);
    }
}
