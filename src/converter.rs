//! Shard converter (spec.md §4.D): turns one sealed staging file into one
//! TSM file with the same ordinal, column by column.

use crate::block::ColumnBuilder;
use crate::error::{EngineError, Result};
use crate::row::Row;
use crate::schema::Schema;
use crate::shard::{decode_ts, DATA_BLOCK_ITEM_NUMS, FILE_WIDTH};
use crate::staging;
use crate::tsm::writer::{build_tsm_bytes, write_tsm_file};
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConversionOutcome {
    pub tsm_path: PathBuf,
    /// The staging file this TSM file was converted from. The caller must
    /// not remove it until the TSM file's index has been published — see
    /// spec.md §5's write-visibility guarantee.
    pub staging_path: PathBuf,
    /// The row with the greatest timestamp observed in this staging file,
    /// for the caller to fold into the shard's latest-row slot.
    pub latest_row: Option<Row>,
}

fn load_rows(staging_path: &Path, schema: &Schema, vin_num: u16) -> Result<Vec<Row>> {
    let bytes = fs::read(staging_path)?;
    let mut cursor = bytes.as_slice();
    let path_str = staging_path.display().to_string();
    staging::read_header(&mut cursor, &path_str)?;

    let mut rows = Vec::new();
    while let Some(row) = staging::read_row(&mut cursor, schema, vin_num)? {
        rows.push(row);
    }
    Ok(rows)
}

/// Converts staging file `ordinal` of `shard` into a TSM file of the same
/// ordinal, under `data_dir`. Does not remove the staging file: the caller
/// must do that only after publishing the TSM file to the index, so a
/// concurrent query never sees neither source of truth at once.
pub fn convert(
    data_dir: &Path,
    shard: u16,
    ordinal: u32,
    schema: &Schema,
) -> Result<ConversionOutcome> {
    let staging_path = data_dir.join("no-compaction").join(shard.to_string()).join(ordinal.to_string());
    let rows = load_rows(&staging_path, schema, shard)?;

    let file_base_idx = (ordinal as u32) * (FILE_WIDTH as u32);
    let mut builders: Vec<ColumnBuilder> = schema
        .columns()
        .iter()
        .map(|(_, ty)| ColumnBuilder::new(*ty))
        .collect();

    let mut latest_row: Option<Row> = None;

    for row in &rows {
        let ts_idx = decode_ts(row.timestamp).ok_or_else(|| {
            EngineError::Internal(format!(
                "staging row at shard {shard} ordinal {ordinal} has out-of-window timestamp {}",
                row.timestamp
            ))
        })? as u32;

        if ts_idx < file_base_idx || ts_idx >= file_base_idx + FILE_WIDTH as u32 {
            return Err(EngineError::Internal(format!(
                "staging row ts_idx {ts_idx} falls outside file {ordinal}'s range"
            )));
        }
        let file_local_idx = ts_idx - file_base_idx;
        let block_index = (file_local_idx / DATA_BLOCK_ITEM_NUMS as u32) as usize;
        let offset_in_block = (file_local_idx % DATA_BLOCK_ITEM_NUMS as u32) as u16;

        for (builder, (name, _)) in builders.iter_mut().zip(schema.columns().iter()) {
            let value = row
                .get(name)
                .ok_or_else(|| EngineError::Internal(format!("row missing column {name}")))?;
            builder.insert(block_index, offset_in_block, value);
        }

        if latest_row.as_ref().map_or(true, |r| row.timestamp > r.timestamp) {
            latest_row = Some(row.clone());
        }
    }

    let encoded_columns: Result<Vec<_>> = builders.into_iter().map(ColumnBuilder::finish).collect();
    let encoded_columns = encoded_columns?;
    let bytes = build_tsm_bytes(schema, encoded_columns)?;

    let tsm_dir = data_dir.join("compaction").join(shard.to_string());
    fs::create_dir_all(&tsm_dir)?;
    let tsm_path = tsm_dir.join(ordinal.to_string());
    write_tsm_file(&tsm_path, &bytes)?;

    // The staging file is removed by the caller, only after the TSM file's
    // index has been published to the in-memory index manager — otherwise a
    // concurrent query could observe neither the staging rows nor the TSM
    // file for the window this conversion just covered (spec.md §5).
    Ok(ConversionOutcome {
        tsm_path,
        staging_path,
        latest_row,
    })
}
