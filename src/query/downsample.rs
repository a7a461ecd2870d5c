//! Downsample executor (spec.md §4.H): aggregates each of N equal
//! sub-intervals independently, tracking the NO_DATA / HAVE_DATA /
//! FILTER_ALL_DATA state per sub-interval. When a filter is supplied, every
//! covered block must be decoded — the pre-computed `sum`/`max` only ever
//! describes the unfiltered population.

use crate::block::block_item_cap;
use crate::error::{EngineError, Result};
use crate::index_manager::IndexManager;
use crate::query::{AggregateValue, Aggregator, CompareExpression};
use crate::row::ColumnValue;
use crate::schema::ColumnType;
use crate::shard::{encode_ts, ms_range_to_idx_range};
use crate::tsm::reader::read_block_at;

enum SubRangeState {
    NoData,
    HaveData(AggregateValue),
    FilterAll,
}

fn sentinel(column_type: ColumnType) -> AggregateValue {
    match column_type {
        ColumnType::Int32 => AggregateValue::Int(i32::MIN as i64),
        ColumnType::Float64 => AggregateValue::Float(f64::NAN),
        ColumnType::Str => unreachable!("downsample is numeric-only"),
    }
}

fn run_sub_range(
    index: &IndexManager,
    shard: u16,
    column: &str,
    column_type: ColumnType,
    aggregator: Aggregator,
    filter: Option<&CompareExpression>,
    lo_idx: u16,
    hi_idx: u16,
) -> Result<SubRangeState> {
    let hits = index.query(shard, column, lo_idx, hi_idx);
    let block_width = block_item_cap() as u16;

    let mut any_row = false;
    let mut match_count: u64 = 0;
    let mut sum_i: i64 = 0;
    let mut sum_f: f64 = 0.0;
    let mut max_i: Option<i64> = None;
    let mut max_f: Option<f64> = None;

    for hit in hits {
        if hit.entry.size == 0 {
            continue;
        }
        let covered_len = hit.hi_in_block - hit.lo_in_block + 1;

        if filter.is_none() && covered_len == block_width {
            any_row = true;
            match_count += covered_len as u64;
            match column_type {
                ColumnType::Int32 => {
                    sum_i += hit.entry.int_sum();
                    let v = hit.entry.int_max();
                    max_i = Some(max_i.map_or(v as i64, |m| m.max(v as i64)));
                }
                ColumnType::Float64 => {
                    sum_f += hit.entry.float_sum();
                    let v = hit.entry.float_max();
                    max_f = Some(max_f.map_or(v, |m| m.max(v)));
                }
                ColumnType::Str => unreachable!(),
            }
            continue;
        }

        let path = index.tsm_file_path(shard, hit.ordinal);
        let values = read_block_at(&path, column_type, &hit.entry)?;
        for (offset, value) in values {
            if offset < hit.lo_in_block || offset > hit.hi_in_block {
                continue;
            }
            any_row = true;
            if let Some(f) = filter {
                if !f.matches(&value) {
                    continue;
                }
            }
            match_count += 1;
            match value {
                ColumnValue::Int32(v) => {
                    sum_i += v as i64;
                    max_i = Some(max_i.map_or(v as i64, |m| m.max(v as i64)));
                }
                ColumnValue::Float64(v) => {
                    sum_f += v;
                    max_f = Some(max_f.map_or(v, |m| m.max(v)));
                }
                ColumnValue::Str(_) => unreachable!(),
            }
        }
    }

    if !any_row {
        return Ok(SubRangeState::NoData);
    }
    if match_count == 0 {
        return Ok(SubRangeState::FilterAll);
    }

    let value = match aggregator {
        Aggregator::Max => match column_type {
            ColumnType::Int32 => AggregateValue::Int(max_i.unwrap()),
            ColumnType::Float64 => AggregateValue::Float(max_f.unwrap()),
            ColumnType::Str => unreachable!(),
        },
        Aggregator::Avg => {
            let sum = match column_type {
                ColumnType::Int32 => sum_i as f64,
                ColumnType::Float64 => sum_f,
                ColumnType::Str => unreachable!(),
            };
            AggregateValue::Float(sum / match_count as f64)
        }
    };
    Ok(SubRangeState::HaveData(value))
}

/// `downsample(interval, aggregator, column, filter, range)`. Each output
/// row is stamped with its sub-interval's lower-bound timestamp, mirroring
/// aggregate's own "timestamp is the range's lower bound" convention
/// (spec.md §9 design note).
pub fn downsample_query(
    index: &IndexManager,
    shard: u16,
    column: &str,
    column_type: ColumnType,
    aggregator: Aggregator,
    filter: Option<&CompareExpression>,
    ts_lo: i64,
    ts_hi: i64,
    interval_ms: i64,
) -> Result<Vec<(i64, AggregateValue)>> {
    let Some((lo_idx, hi_idx)) = ms_range_to_idx_range(ts_lo, ts_hi) else {
        return Ok(Vec::new());
    };
    if interval_ms <= 0 || interval_ms % 1000 != 0 {
        return Err(EngineError::MisalignedInterval);
    }
    let interval_idx = (interval_ms / 1000) as u32;
    let total = hi_idx as u32 - lo_idx as u32 + 1;
    if interval_idx == 0 || total % interval_idx != 0 {
        return Err(EngineError::MisalignedInterval);
    }

    let mut out = Vec::new();
    let mut sub_lo = lo_idx as u32;
    while sub_lo <= hi_idx as u32 {
        let sub_hi = sub_lo + interval_idx - 1;
        let state = run_sub_range(
            index,
            shard,
            column,
            column_type,
            aggregator,
            filter,
            sub_lo as u16,
            sub_hi as u16,
        )?;
        match state {
            SubRangeState::NoData => {}
            SubRangeState::HaveData(v) => out.push((encode_ts(sub_lo as u16), v)),
            SubRangeState::FilterAll => out.push((encode_ts(sub_lo as u16), sentinel(column_type))),
        }
        sub_lo += interval_idx;
    }

    Ok(out)
}
