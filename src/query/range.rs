//! Time-range executor (spec.md §4.G): walks the overlapping TSM files for
//! one shard, decoding only the blocks the index manager says are needed,
//! and additionally scans any not-yet-converted staging files so a row
//! written moments ago is visible immediately (spec.md §5 ordering
//! guarantee).

use crate::error::Result;
use crate::index_manager::IndexManager;
use crate::row::{ColumnValue, Row};
use crate::schema::Schema;
use crate::shard::{decode_ts, encode_ts, ms_range_to_idx_range, DATA_BLOCK_ITEM_NUMS, FILE_WIDTH};
use crate::staging;
use crate::tsm::reader::read_block_at;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Runs the core index-driven scan, returning `ts_idx -> partial row`
/// without merging in staging-file data; shared by the aggregate and
/// downsample executors, which need the same per-column decoded values but
/// apply their own reduction instead of materializing output rows.
pub(crate) fn scan_converted(
    index: &IndexManager,
    shard: u16,
    column: &str,
    lo_idx: u16,
    hi_idx: u16,
) -> Result<BTreeMap<u16, ColumnValue>> {
    let hits = index.query(shard, column, lo_idx, hi_idx);
    let mut out = BTreeMap::new();
    for hit in hits {
        let path = index.tsm_file_path(shard, hit.ordinal);
        let column_type = column_type_of(&path, column)?;
        let values = read_block_at(&path, column_type, &hit.entry)?;
        let file_base = hit.ordinal * FILE_WIDTH as u32;
        let block_base = file_base + hit.block_index as u32 * DATA_BLOCK_ITEM_NUMS as u32;
        for (offset_in_block, value) in values {
            if offset_in_block < hit.lo_in_block || offset_in_block > hit.hi_in_block {
                continue;
            }
            let ts_idx = (block_base + offset_in_block as u32) as u16;
            out.insert(ts_idx, value);
        }
    }
    Ok(out)
}

fn column_type_of(tsm_path: &Path, column: &str) -> Result<crate::schema::ColumnType> {
    let file = crate::tsm::reader::TsmFile::open(tsm_path)?;
    file.column_type(column)
}

fn scan_staging(
    data_dir: &Path,
    shard: u16,
    schema: &Schema,
    columns: &[String],
    ts_lo: i64,
    ts_hi: i64,
) -> Result<BTreeMap<u16, Vec<(String, ColumnValue)>>> {
    let mut out = BTreeMap::new();
    let dir = data_dir.join("no-compaction").join(shard.to_string());
    if !dir.is_dir() {
        return Ok(out);
    }
    let mut ordinals: Vec<u32> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u32>().ok()))
        .collect();
    ordinals.sort_unstable();

    for ordinal in ordinals {
        let path = dir.join(ordinal.to_string());
        let Ok(bytes) = fs::read(&path) else { continue };
        let mut cursor = bytes.as_slice();
        let path_str = path.display().to_string();
        if staging::read_header(&mut cursor, &path_str).is_err() {
            continue;
        }
        while let Ok(Some(row)) = staging::read_row(&mut cursor, schema, shard) {
            if row.timestamp < ts_lo || row.timestamp >= ts_hi {
                continue;
            }
            let Some(ts_idx) = decode_ts(row.timestamp) else { continue };
            let projected: Vec<(String, ColumnValue)> = columns
                .iter()
                .filter_map(|name| row.get(name).map(|v| (name.clone(), v.clone())))
                .collect();
            out.insert(ts_idx, projected);
        }
    }
    Ok(out)
}

/// `timeRangeQuery`: rows are returned in ts_idx order, stamped with
/// `vin_num` (the caller already knows which vehicle this shard is).
pub fn time_range_query(
    data_dir: &Path,
    index: &IndexManager,
    schema: &Schema,
    shard: u16,
    vin_num: u16,
    ts_lo: i64,
    ts_hi: i64,
    columns: &[String],
) -> Result<Vec<Row>> {
    let Some((lo_idx, hi_idx)) = ms_range_to_idx_range(ts_lo, ts_hi) else {
        return Ok(Vec::new());
    };

    let mut by_idx: BTreeMap<u16, Vec<(String, ColumnValue)>> = BTreeMap::new();
    for column in columns {
        let values = scan_converted(index, shard, column, lo_idx, hi_idx)?;
        for (ts_idx, value) in values {
            by_idx.entry(ts_idx).or_default().push((column.clone(), value));
        }
    }

    let staging_rows = scan_staging(data_dir, shard, schema, columns, ts_lo, ts_hi)?;
    for (ts_idx, cols) in staging_rows {
        by_idx.entry(ts_idx).or_insert(cols);
    }

    Ok(by_idx
        .into_iter()
        .map(|(ts_idx, cols)| Row {
            vin_num,
            timestamp: encode_ts(ts_idx),
            columns: cols,
        })
        .collect())
}
