//! Gorilla XOR float compression (Pelkonen et al., VLDB 2015), over the raw
//! bit pattern of each `f64`. Ported from the teacher's
//! `encoding::float_encoder` module (itself adapted from `dgryski/go-tsz`),
//! with the timestamp-compression half removed (this engine's timestamps are
//! never co-encoded with the value stream — see `codec::integer` for that)
//! and errors routed through `CodecError` instead of `anyhow`.

use crate::codec::bit::{BitReader, BitWriter, Read as _, Write as _};
use crate::error::CodecError;

const BASIC_VALUE: u64 = u64::MAX;

pub struct GorillaEncoder {
    val: f64,
    leading: u64,
    trailing: u64,
    bw: BitWriter,
    first: bool,
}

impl GorillaEncoder {
    pub fn new() -> Self {
        Self {
            val: 0.0,
            leading: 0,
            trailing: BASIC_VALUE,
            bw: BitWriter::new(),
            first: true,
        }
    }

    pub fn write(&mut self, v: f64) -> Result<(), CodecError> {
        if v.is_nan() {
            return Err(CodecError::OutOfRange("gorilla cannot encode NaN".into()));
        }

        if self.first {
            self.val = v;
            self.first = false;
            self.bw.write_bits(v.to_bits(), 64);
            return Ok(());
        }

        let v_delta = v.to_bits() ^ self.val.to_bits();

        if v_delta == 0 {
            self.bw.write_bit(crate::codec::bit::Bit::Zero);
        } else {
            self.bw.write_bit(crate::codec::bit::Bit::One);

            let mut leading = v_delta.leading_zeros() as u64;
            let trailing = v_delta.trailing_zeros() as u64;

            leading &= 0x1F;
            if leading >= 32 {
                leading = 31;
            }

            if self.leading != BASIC_VALUE && leading >= self.leading && trailing >= self.trailing {
                self.bw.write_bit(crate::codec::bit::Bit::Zero);
                self.bw.write_bits(
                    v_delta >> self.trailing,
                    64 - self.leading as u32 - self.trailing as u32,
                );
            } else {
                self.leading = leading;
                self.trailing = trailing;

                self.bw.write_bit(crate::codec::bit::Bit::One);
                self.bw.write_bits(leading, 5);

                let sigbits = 64 - leading - trailing;
                self.bw.write_bits(sigbits, 6);
                self.bw.write_bits(v_delta >> trailing, sigbits as u32);
            }
        }

        self.val = v;
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bw.into_bytes()
    }
}

pub struct GorillaDecoder<'a> {
    val: f64,
    leading: u32,
    trailing: u32,
    br: BitReader<'a>,
    first: bool,
}

impl<'a> GorillaDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            val: 0.0,
            leading: 0,
            trailing: 0,
            br: BitReader::new(bytes),
            first: true,
        }
    }

    /// Decodes the next value, or `Ok(None)` once `count` values (tracked by
    /// the caller) have all been produced. Unlike the teacher's version,
    /// this decoder is driven by an explicit expected count rather than a
    /// NaN end-of-stream sentinel, since the block format already records
    /// how many values it holds (the data block's item count).
    pub fn next(&mut self) -> Result<f64, CodecError> {
        if self.first {
            self.first = false;
            let bits = self.br.read_bits(64)?;
            self.val = f64::from_bits(bits);
            return Ok(self.val);
        }

        if self.br.read_bit()? == crate::codec::bit::Bit::Zero {
            return Ok(self.val);
        }

        if self.br.read_bit()? == crate::codec::bit::Bit::One {
            let leading = self.br.read_bits(5)? as u32;
            let sigbits_raw = self.br.read_bits(6)? as u32;
            let sigbits = if sigbits_raw == 0 { 64 } else { sigbits_raw };
            self.leading = leading;
            self.trailing = 64 - leading - sigbits;
        }

        let mbits = 64 - self.leading - self.trailing;
        let bits = self.br.read_bits(mbits)?;
        let v_delta = bits << self.trailing;
        self.val = f64::from_bits(self.val.to_bits() ^ v_delta);
        Ok(self.val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(values: &[f64]) -> Vec<f64> {
        let mut enc = GorillaEncoder::new();
        for &v in values {
            enc.write(v).unwrap();
        }
        let bytes = enc.into_bytes();

        let mut dec = GorillaDecoder::new(&bytes);
        (0..values.len()).map(|_| dec.next().unwrap()).collect()
    }

    #[test]
    fn round_trips_constant_values() {
        let values = vec![3.5f64; 2000];
        assert_eq!(round_trip(&values), values);
    }

    #[test]
    fn round_trips_varying_values() {
        let values: Vec<f64> = (0..2000).map(|i| (i as f64) * 0.1).collect();
        assert_eq!(round_trip(&values), values);
    }

    #[test]
    fn rejects_nan_input() {
        let mut enc = GorillaEncoder::new();
        assert!(enc.write(f64::NAN).is_err());
    }
}
