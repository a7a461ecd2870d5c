//! Aggregate executor (spec.md §4.H): reuses the range machinery's index
//! walk, but uses each block's pre-computed `sum`/`max` directly whenever
//! the query fully covers that block, decoding only the partially-covered
//! edge blocks.

use crate::block::block_item_cap;
use crate::error::Result;
use crate::index_manager::IndexManager;
use crate::query::{AggregateValue, Aggregator};
use crate::row::ColumnValue;
use crate::schema::ColumnType;
use crate::shard::ms_range_to_idx_range;
use crate::tsm::reader::read_block_at;

/// `aggregate(MAX|AVG, column, range)`. Returns `None` for an out-of-window
/// or otherwise empty range — not an error (spec.md §4.H failure semantics).
pub fn aggregate_query(
    index: &IndexManager,
    shard: u16,
    column: &str,
    column_type: ColumnType,
    aggregator: Aggregator,
    ts_lo: i64,
    ts_hi: i64,
) -> Result<Option<AggregateValue>> {
    let Some((lo_idx, hi_idx)) = ms_range_to_idx_range(ts_lo, ts_hi) else {
        return Ok(None);
    };

    let hits = index.query(shard, column, lo_idx, hi_idx);
    if hits.is_empty() {
        return Ok(None);
    }

    let block_width = block_item_cap() as u16;
    let mut max_i: Option<i64> = None;
    let mut max_f: Option<f64> = None;
    let mut sum_i: i64 = 0;
    let mut sum_f: f64 = 0.0;
    let mut count: u64 = 0;

    for hit in hits {
        if hit.entry.size == 0 {
            continue;
        }
        let covered_len = hit.hi_in_block - hit.lo_in_block + 1;
        let path = index.tsm_file_path(shard, hit.ordinal);

        if covered_len == block_width {
            match column_type {
                ColumnType::Int32 => {
                    let v = hit.entry.int_max();
                    max_i = Some(max_i.map_or(v as i64, |m| m.max(v as i64)));
                    sum_i += hit.entry.int_sum();
                }
                ColumnType::Float64 => {
                    let v = hit.entry.float_max();
                    max_f = Some(max_f.map_or(v, |m| m.max(v)));
                    sum_f += hit.entry.float_sum();
                }
                ColumnType::Str => unreachable!("aggregation is numeric-only"),
            }
            count += covered_len as u64;
        } else {
            let values = read_block_at(&path, column_type, &hit.entry)?;
            for (offset, value) in values {
                if offset < hit.lo_in_block || offset > hit.hi_in_block {
                    continue;
                }
                match value {
                    ColumnValue::Int32(v) => {
                        max_i = Some(max_i.map_or(v as i64, |m| m.max(v as i64)));
                        sum_i += v as i64;
                        count += 1;
                    }
                    ColumnValue::Float64(v) => {
                        max_f = Some(max_f.map_or(v, |m| m.max(v)));
                        sum_f += v;
                        count += 1;
                    }
                    ColumnValue::Str(_) => unreachable!("aggregation is numeric-only"),
                }
            }
        }
    }

    if count == 0 {
        return Ok(None);
    }

    Ok(Some(match aggregator {
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
            AggregateValue::Float(sum / count as f64)
        }
    }))
}
