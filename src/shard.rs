//! Sharding and time-indexing constants and codecs (spec.md §2, §3.1).
//!
//! The core engine never parses a raw vehicle id itself — callers route
//! writes and queries by `vin_num`, and `decode_vin`/`encode_vin` are the
//! only bridge between the 17-byte ASCII identifier and that integer.

/// Prefix every vehicle id begins with; the trailing 4 ASCII digits encode
/// the shard's ordinal within `[MIN_VIN_NUM, MAX_VIN_NUM)`.
pub const VIN_PREFIX: &[u8] = b"LSVNV2182E054";
pub const VIN_LENGTH: usize = 17;

pub const VIN_NUM_RANGE: u16 = 5000;
pub const MIN_VIN_NUM: u16 = 1654;
pub const MAX_VIN_NUM: u16 = MIN_VIN_NUM + VIN_NUM_RANGE;

/// Inclusive lower bound (ms) of the bounded ingest window.
pub const TS_BASE: i64 = 1_694_043_124_000;
pub const TS_NUM_RANGE: u16 = 36_000;

pub const SCHEMA_COLUMN_NUMS: usize = 60;

/// Number of values packed into a single compressed data block.
pub const DATA_BLOCK_ITEM_NUMS: u16 = 2000;

/// ts_idx width of one TSM file ("FILE_CONVERT_SIZE" upstream).
pub const FILE_WIDTH: u16 = 18_000;

/// Rows held in one staging file before it is sealed. Chosen equal to
/// `FILE_WIDTH` so that staging-file ordinals and TSM-file ordinals line up
/// 1:1, per §4.D ("one TSM file with the same ordinal").
pub const FLUSH_SIZE: u32 = FILE_WIDTH as u32;

pub const TSM_FILE_COUNT: u16 = TS_NUM_RANGE / FILE_WIDTH;
pub const DATA_BLOCK_COUNT: u16 = FILE_WIDTH / DATA_BLOCK_ITEM_NUMS;

/// Staging files accumulated before a batch is handed to the converter pool.
pub const COMPACTION_BATCH: u32 = 1;

pub const POOL_THREAD_NUM: usize = 8;
pub const BITPACKING_RANGE_NUM: u32 = 1 << 6;

/// Decode the 17-byte vehicle id into a dense shard id `[0, VIN_NUM_RANGE)`.
/// Returns `None` for malformed ids, which the caller must drop silently
/// (spec.md §3: "invalid ids are dropped").
pub fn decode_vin(vin: &[u8; VIN_LENGTH]) -> Option<u16> {
    if &vin[..VIN_PREFIX.len()] != VIN_PREFIX {
        return None;
    }
    let digits = &vin[13..17];
    let mut suffix: u16 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        suffix = suffix * 10 + (b - b'0') as u16;
    }
    if suffix >= MIN_VIN_NUM && suffix < MAX_VIN_NUM {
        Some(suffix - MIN_VIN_NUM)
    } else {
        None
    }
}

/// Inverse of `decode_vin`, used to stamp `vehicle_id` onto result rows.
pub fn encode_vin(vin_num: u16) -> [u8; VIN_LENGTH] {
    assert!(vin_num < VIN_NUM_RANGE);
    let suffix = vin_num + MIN_VIN_NUM;
    let mut out = [0u8; VIN_LENGTH];
    out[..VIN_PREFIX.len()].copy_from_slice(VIN_PREFIX);
    let digits = format!("{:04}", suffix);
    out[13..17].copy_from_slice(digits.as_bytes());
    out
}

/// `ts_idx = (ts_ms - TS_BASE) / 1000`, whole seconds from the base.
pub fn decode_ts(ts_ms: i64) -> Option<u16> {
    if ts_ms < TS_BASE {
        return None;
    }
    let idx = (ts_ms - TS_BASE) / 1000;
    if idx >= 0 && idx < TS_NUM_RANGE as i64 {
        Some(idx as u16)
    } else {
        None
    }
}

pub fn encode_ts(ts_idx: u16) -> i64 {
    ts_idx as i64 * 1000 + TS_BASE
}

/// Translates a half-open millisecond range `[ts_lo, ts_hi)` into an
/// inclusive `ts_idx` range clipped to the ingest window, or `None` if the
/// two don't overlap at all (spec.md §4.G: "reject out-of-range queries
/// silently").
pub fn ms_range_to_idx_range(ts_lo: i64, ts_hi: i64) -> Option<(u16, u16)> {
    let window_hi_excl = TS_BASE + TS_NUM_RANGE as i64 * 1000;
    let lo = ts_lo.max(TS_BASE);
    let hi_excl = ts_hi.min(window_hi_excl);
    if lo >= hi_excl {
        return None;
    }
    let lo_idx = ((lo - TS_BASE) + 999) / 1000; // ceil: smallest idx whose ms >= lo
    let hi_idx = (hi_excl - 1 - TS_BASE) / 1000; // floor: largest idx whose ms < hi_excl
    if lo_idx > hi_idx {
        return None;
    }
    Some((lo_idx as u16, hi_idx as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vin_round_trip() {
        for vin_num in [0u16, 1, 2499, 4999] {
            let vin = encode_vin(vin_num);
            assert_eq!(decode_vin(&vin), Some(vin_num));
        }
    }

    #[test]
    fn vin_rejects_bad_prefix() {
        let mut vin = encode_vin(10);
        vin[0] = b'X';
        assert_eq!(decode_vin(&vin), None);
    }

    #[test]
    fn vin_rejects_out_of_range_suffix() {
        let mut vin = encode_vin(10);
        vin[13..17].copy_from_slice(b"9999");
        assert_eq!(decode_vin(&vin), None);
    }

    #[test]
    fn ts_round_trip() {
        for idx in [0u16, 1, 17999, 35999] {
            let ms = encode_ts(idx);
            assert_eq!(decode_ts(ms), Some(idx));
        }
    }

    #[test]
    fn ts_out_of_window() {
        assert_eq!(decode_ts(TS_BASE - 1), None);
        assert_eq!(decode_ts(encode_ts(TS_NUM_RANGE - 1) + 1000), None);
    }

    #[test]
    fn idx_range_aligned_bounds() {
        assert_eq!(ms_range_to_idx_range(TS_BASE, TS_BASE + 2000), Some((0, 1)));
    }

    #[test]
    fn idx_range_clips_to_window() {
        let window_hi = TS_BASE + TS_NUM_RANGE as i64 * 1000;
        assert_eq!(
            ms_range_to_idx_range(TS_BASE - 5000, window_hi + 5000),
            Some((0, TS_NUM_RANGE - 1))
        );
    }

    #[test]
    fn idx_range_rejects_disjoint_range() {
        assert_eq!(ms_range_to_idx_range(TS_BASE - 5000, TS_BASE - 1000), None);
    }

    #[test]
    fn idx_range_handles_non_aligned_bounds() {
        // [TS_BASE+500, TS_BASE+1500): only ts_idx=1 (ms TS_BASE+1000) qualifies.
        assert_eq!(ms_range_to_idx_range(TS_BASE + 500, TS_BASE + 1500), Some((1, 1)));
    }
}
