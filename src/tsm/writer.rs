//! Serializes a converted shard's columns into the TSM byte layout and
//! durably renders it onto disk (spec.md §4.B, §4.D step 5-6).

use crate::block::EncodedBlock;
use crate::error::Result;
use crate::schema::{ColumnType, Schema};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

fn column_type_tag(ty: ColumnType) -> u8 {
    match ty {
        ColumnType::Int32 => 0,
        ColumnType::Float64 => 1,
        ColumnType::Str => 2,
    }
}

/// Lays out `[data blocks][index blocks in schema order][footer]` for one
/// TSM file, given every column's already-codec-chosen blocks in schema
/// order. Index entry `offset`/`size` are filled in here, not by the block
/// builder, since only the writer knows each block's final position.
pub fn build_tsm_bytes(schema: &Schema, mut columns: Vec<Vec<EncodedBlock>>) -> Result<Vec<u8>> {
    debug_assert_eq!(columns.len(), schema.columns().len());

    let mut out = Vec::new();

    for col_blocks in columns.iter_mut() {
        for block in col_blocks.iter_mut() {
            block.entry.offset = out.len() as u32;
            block.entry.size = block.bytes.len() as u32;
            out.extend_from_slice(&block.bytes);
        }
    }

    let index_offset = out.len() as u32;

    for (col_blocks, (name, ty)) in columns.iter().zip(schema.columns().iter()) {
        out.write_u16::<LittleEndian>(col_blocks.len() as u16).unwrap();
        out.push(column_type_tag(*ty));
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        for block in col_blocks {
            block.entry.write_to(&mut out);
        }
    }

    let footer_offset = out.len() as u32;
    out.write_u32::<LittleEndian>(index_offset).unwrap();
    out.write_u32::<LittleEndian>(footer_offset).unwrap();

    Ok(out)
}

/// Writes `bytes` to a temp file beside `final_path`, fsyncs it, then
/// atomically renames it into place — a TSM file must never be visible
/// under its final name unless it is durable (spec.md §4.B addition,
/// mirroring the teacher's `COMPACTION_TEMP_EXTENSION` convention).
pub fn write_tsm_file(final_path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = final_path.with_extension("tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, final_path)?;
    Ok(())
}
