//! STRING column codec: `(len: u8, bytes)*` then ZSTD, falling back to the
//! uncompressed `(len, bytes)*` stream when ZSTD does not shrink it
//! (spec.md §4.A). Each value is capped at 255 bytes.

use crate::codec::{STRING_PLAIN, STRING_ZSTD, ZSTD_LEVEL};
use crate::error::CodecError;

fn pack_raw(values: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
    let mut raw = Vec::with_capacity(values.iter().map(|v| 1 + v.len()).sum());
    for v in values {
        if v.len() > 255 {
            return Err(CodecError::OutOfRange(format!(
                "string value of {} bytes exceeds the 255-byte limit",
                v.len()
            )));
        }
        raw.push(v.len() as u8);
        raw.extend_from_slice(v);
    }
    Ok(raw)
}

fn unpack_raw(mut raw: &[u8], count: usize) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let (&len, rest) = raw.split_first().ok_or(CodecError::Truncated)?;
        let len = len as usize;
        if rest.len() < len {
            return Err(CodecError::Truncated);
        }
        out.push(rest[..len].to_vec());
        raw = &rest[len..];
    }
    Ok(out)
}

pub fn encode_block(values: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
    debug_assert!(!values.is_empty());

    let raw = pack_raw(values)?;
    let compressed = zstd::stream::encode_all(raw.as_slice(), ZSTD_LEVEL).map_err(CodecError::Zstd)?;

    if compressed.len() + 1 < raw.len() + 1 {
        let mut out = Vec::with_capacity(1 + compressed.len());
        out.push(STRING_ZSTD);
        out.extend_from_slice(&compressed);
        Ok(out)
    } else {
        let mut out = Vec::with_capacity(1 + raw.len());
        out.push(STRING_PLAIN);
        out.extend_from_slice(&raw);
        Ok(out)
    }
}

pub fn decode_block(block: &[u8], count: usize) -> Result<Vec<Vec<u8>>, CodecError> {
    let (&tag, rest) = block.split_first().ok_or(CodecError::Truncated)?;

    match tag {
        STRING_ZSTD => {
            let raw = zstd::stream::decode_all(rest).map_err(CodecError::Zstd)?;
            unpack_raw(&raw, count)
        }
        STRING_PLAIN => unpack_raw(rest, count),
        other => Err(CodecError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_lengths() {
        let values: Vec<Vec<u8>> = (0..2000)
            .map(|i| format!("row-{i}").into_bytes())
            .collect();
        let block = encode_block(&values).unwrap();
        let decoded = decode_block(&block, values.len()).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn round_trips_empty_strings() {
        let values: Vec<Vec<u8>> = vec![Vec::new(); 2000];
        let block = encode_block(&values).unwrap();
        assert_eq!(decode_block(&block, values.len()).unwrap(), values);
    }

    #[test]
    fn rejects_overlong_value() {
        let values = vec![vec![0u8; 256]];
        assert!(encode_block(&values).is_err());
    }
}
