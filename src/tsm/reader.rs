//! Opens a sealed TSM file and serves index lookups and single-block reads
//! for the query executors (spec.md §4.B, §4.G/H).

use crate::block::{decode_sparse_block, IndexEntry, INDEX_ENTRY_SIZE};
use crate::error::{Result, TsmError};
use crate::row::ColumnValue;
use crate::schema::{ColumnType, Schema};
use crate::shard::DATA_BLOCK_COUNT;
use crate::tsm::FOOTER_SIZE;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

struct ColumnIndex {
    name: String,
    column_type: ColumnType,
    entries: Vec<IndexEntry>,
}

/// An opened, fully index-loaded TSM file. Data blocks are decoded lazily,
/// on demand, via `read_block`; the whole file is held in memory since a
/// single shard's TSM file is small relative to `DATA_BLOCK_ITEM_NUMS *
/// DATA_BLOCK_COUNT * SCHEMA_COLUMN_NUMS`.
pub struct TsmFile {
    path: String,
    bytes: Vec<u8>,
    columns: Vec<ColumnIndex>,
}

fn column_type_from_tag(tag: u8, path: &str) -> Result<ColumnType> {
    match tag {
        0 => Ok(ColumnType::Int32),
        1 => Ok(ColumnType::Float64),
        2 => Ok(ColumnType::Str),
        _ => Err(TsmError::BadFooter(path.to_string()).into()),
    }
}

impl TsmFile {
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path.display().to_string();
        let bytes = fs::read(path).map_err(|e| TsmError::Io {
            path: path_str.clone(),
            source: e,
        })?;
        Self::from_bytes(path_str, bytes)
    }

    fn from_bytes(path: String, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < FOOTER_SIZE {
            return Err(TsmError::BadFooter(path).into());
        }
        let footer_start = bytes.len() - FOOTER_SIZE;
        let mut footer = &bytes[footer_start..];
        let index_offset = footer.read_u32::<LittleEndian>().unwrap() as usize;
        let footer_offset = footer.read_u32::<LittleEndian>().unwrap() as usize;

        if footer_offset != footer_start || index_offset > footer_offset {
            return Err(TsmError::BadFooter(path).into());
        }

        let mut cursor = &bytes[index_offset..footer_offset];
        let mut columns = Vec::new();
        while !cursor.is_empty() {
            if cursor.len() < 4 {
                return Err(TsmError::BadFooter(path).into());
            }
            let count = cursor.read_u16::<LittleEndian>().unwrap() as usize;
            let type_tag = cursor.read_u8().unwrap();
            let name_len = cursor.read_u8().unwrap() as usize;
            if cursor.len() < name_len {
                return Err(TsmError::BadFooter(path).into());
            }
            let (name_bytes, rest) = cursor.split_at(name_len);
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            cursor = rest;

            if count != DATA_BLOCK_COUNT as usize {
                return Err(TsmError::IndexEntryCountMismatch {
                    column: name,
                    expected: DATA_BLOCK_COUNT as usize,
                    found: count,
                }
                .into());
            }

            let column_type = column_type_from_tag(type_tag, &path)?;

            let entries_len = count * INDEX_ENTRY_SIZE;
            if cursor.len() < entries_len {
                return Err(TsmError::BadFooter(path).into());
            }
            let (entries_bytes, rest) = cursor.split_at(entries_len);
            let mut entries = Vec::with_capacity(count);
            let mut entry_cursor = entries_bytes;
            for _ in 0..count {
                let (chunk, tail) = entry_cursor.split_at(INDEX_ENTRY_SIZE);
                entries.push(IndexEntry::read_from(chunk)?);
                entry_cursor = tail;
            }
            cursor = rest;

            columns.push(ColumnIndex {
                name,
                column_type,
                entries,
            });
        }

        Ok(Self {
            path,
            bytes,
            columns,
        })
    }

    /// Validates that this file's columns match `schema` in name, type and
    /// order — guards against a stray file from a schema migration.
    pub fn validate_schema(&self, schema: &Schema) -> Result<()> {
        if self.columns.len() != schema.columns().len() {
            return Err(TsmError::BadFooter(self.path.clone()).into());
        }
        for (col, (name, ty)) in self.columns.iter().zip(schema.columns().iter()) {
            if &col.name != name || col.column_type != *ty {
                return Err(TsmError::BadFooter(self.path.clone()).into());
            }
        }
        Ok(())
    }

    fn column(&self, name: &str) -> Result<&ColumnIndex> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| TsmError::ColumnNotFound(name.to_string(), self.path.clone()).into())
    }

    pub fn column_type(&self, name: &str) -> Result<ColumnType> {
        Ok(self.column(name)?.column_type)
    }

    pub fn entries(&self, name: &str) -> Result<&[IndexEntry]> {
        Ok(&self.column(name)?.entries)
    }

    /// Decodes block `block_index` of column `name` into `(offset_in_block,
    /// value)` pairs, empty if the block holds no rows.
    pub fn read_block(&self, name: &str, block_index: usize) -> Result<Vec<(u16, ColumnValue)>> {
        let column = self.column(name)?;
        let entry = column
            .entries
            .get(block_index)
            .ok_or_else(|| TsmError::ColumnNotFound(name.to_string(), self.path.clone()))?;
        if entry.size == 0 {
            return Ok(Vec::new());
        }
        let start = entry.offset as usize;
        let end = start + entry.size as usize;
        if end > self.bytes.len() {
            return Err(TsmError::BadFooter(self.path.clone()).into());
        }
        Ok(decode_sparse_block(column.column_type, &self.bytes[start..end])?)
    }

    /// Consumes the opened file, keeping only its index (column name, type,
    /// and per-block entries) and dropping the retained data bytes — the
    /// in-memory index manager holds only this, never a file's data region
    /// (spec.md §3 invariant: query paths touch the data region only through
    /// an explicit, on-demand `stream_read`).
    pub fn into_index(self) -> Vec<(String, ColumnType, Vec<IndexEntry>)> {
        self.columns
            .into_iter()
            .map(|c| (c.name, c.column_type, c.entries))
            .collect()
    }
}

/// Reads and decodes exactly one data block from disk, without loading the
/// rest of the file — the per-query `stream_read` of spec.md §4.G.
pub fn read_block_at(path: &Path, column_type: ColumnType, entry: &IndexEntry) -> Result<Vec<(u16, ColumnValue)>> {
    if entry.size == 0 {
        return Ok(Vec::new());
    }
    let path_str = path.display().to_string();
    let mut file = fs::File::open(path).map_err(|e| TsmError::Io {
        path: path_str.clone(),
        source: e,
    })?;
    file.seek(SeekFrom::Start(entry.offset as u64))
        .map_err(|e| TsmError::Io {
            path: path_str.clone(),
            source: e,
        })?;
    let mut buf = vec![0u8; entry.size as usize];
    file.read_exact(&mut buf).map_err(|e| TsmError::Io {
        path: path_str,
        source: e,
    })?;
    Ok(decode_sparse_block(column_type, &buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::ColumnValue;
    use crate::schema::Schema;
    use crate::tsm::writer::{build_tsm_bytes, write_tsm_file};
    use crate::block::ColumnBuilder;
    use tempfile::tempdir;

    #[test]
    fn round_trips_a_written_file() {
        let schema = Schema::new(vec![
            ("speed".into(), ColumnType::Int32),
            ("temp".into(), ColumnType::Float64),
        ])
        .unwrap();

        let mut speed = ColumnBuilder::new(ColumnType::Int32);
        let mut temp = ColumnBuilder::new(ColumnType::Float64);
        for i in 0..2000u16 {
            speed.insert(0, i, &ColumnValue::Int32(i as i32));
            temp.insert(3, i, &ColumnValue::Float64(i as f64 * 0.5));
        }
        let columns = vec![speed.finish().unwrap(), temp.finish().unwrap()];

        let bytes = build_tsm_bytes(&schema, columns).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.tsm");
        write_tsm_file(&path, &bytes).unwrap();

        let file = TsmFile::open(&path).unwrap();
        file.validate_schema(&schema).unwrap();
        assert_eq!(file.column_type("speed").unwrap(), ColumnType::Int32);

        let block0 = file.read_block("speed", 0).unwrap();
        assert_eq!(block0.len(), 2000);
        assert_eq!(block0[0], (0, ColumnValue::Int32(0)));

        let block1 = file.read_block("speed", 1).unwrap();
        assert!(block1.is_empty());

        let temp_block3 = file.read_block("temp", 3).unwrap();
        assert_eq!(temp_block3[10], (10, ColumnValue::Float64(5.0)));
    }

    #[test]
    fn rejects_unknown_column() {
        let schema = Schema::new(vec![("speed".into(), ColumnType::Int32)]).unwrap();
        let mut speed = ColumnBuilder::new(ColumnType::Int32);
        speed.insert(0, 0, &ColumnValue::Int32(1));
        let columns = vec![speed.finish().unwrap()];
        let bytes = build_tsm_bytes(&schema, columns).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("0.tsm");
        write_tsm_file(&path, &bytes).unwrap();

        let file = TsmFile::open(&path).unwrap();
        assert!(file.read_block("nope", 0).is_err());
    }
}
