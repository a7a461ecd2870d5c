//! Staging file row codec (spec.md §3, §4.C; header per SPEC_FULL.md §3.3).
//!
//! A staging file is one shard's append-only row log: an 8-byte header
//! followed by a stream of row images, grouped by column type —
//! `timestamp | int32 cols in schema order | float64 cols | (len, bytes)
//! for string cols` — never a fixed stride, since string columns are
//! variable-length.

use crate::error::{EngineError, Result};
use crate::row::{ColumnValue, Row};
use crate::schema::{ColumnType, Schema};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const MAGIC: u32 = 0x5453_4647;
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 8;

/// Writes the mandatory 8-byte staging-file header.
pub fn write_header(w: &mut impl Write) -> Result<()> {
    w.write_u32::<LittleEndian>(MAGIC)?;
    w.write_u8(FORMAT_VERSION)?;
    w.write_all(&[0u8; 3])?;
    Ok(())
}

/// Reads and validates the header, returning `CorruptStaging` (not a raw I/O
/// error) on a magic or version mismatch — the caller treats this as a fatal
/// corruption per spec.md §7 kind 4, distinct from an empty/missing file.
pub fn read_header(r: &mut impl Read, path_for_error: &str) -> Result<()> {
    let mut buf = [0u8; HEADER_SIZE];
    r.read_exact(&mut buf)
        .map_err(|_| EngineError::CorruptStaging(path_for_error.to_string()))?;
    let magic = (&buf[0..4]).read_u32::<LittleEndian>().unwrap();
    let version = buf[4];
    if magic != MAGIC || version != FORMAT_VERSION {
        return Err(EngineError::CorruptStaging(path_for_error.to_string()));
    }
    Ok(())
}

/// Serializes one row's columns (must cover every schema column) in the
/// on-disk grouped-by-type order.
pub fn write_row(w: &mut impl Write, schema: &Schema, row: &Row) -> Result<()> {
    w.write_i64::<LittleEndian>(row.timestamp)?;

    for (name, ty) in schema.columns() {
        if *ty != ColumnType::Int32 {
            continue;
        }
        let v = row
            .get(name)
            .and_then(ColumnValue::as_i32)
            .ok_or_else(|| EngineError::InvalidSchema(format!("row missing int column {name}")))?;
        w.write_i32::<LittleEndian>(v)?;
    }
    for (name, ty) in schema.columns() {
        if *ty != ColumnType::Float64 {
            continue;
        }
        let v = row
            .get(name)
            .and_then(ColumnValue::as_f64)
            .ok_or_else(|| EngineError::InvalidSchema(format!("row missing float column {name}")))?;
        w.write_f64::<LittleEndian>(v)?;
    }
    for (name, ty) in schema.columns() {
        if *ty != ColumnType::Str {
            continue;
        }
        let v = match row.get(name) {
            Some(ColumnValue::Str(v)) => v,
            _ => return Err(EngineError::InvalidSchema(format!("row missing string column {name}"))),
        };
        if v.len() > 255 {
            return Err(EngineError::InvalidSchema(format!(
                "string column {name} exceeds 255 bytes"
            )));
        }
        w.write_u8(v.len() as u8)?;
        w.write_all(v)?;
    }
    Ok(())
}

/// Reads one row, returning `Ok(None)` at a clean end of stream (no partial
/// bytes read) and an error on any other truncation.
pub fn read_row(r: &mut impl Read, schema: &Schema, vin_num: u16) -> Result<Option<Row>> {
    let timestamp = match r.read_i64::<LittleEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut ints = Vec::new();
    for _ in schema.columns().iter().filter(|(_, t)| *t == ColumnType::Int32) {
        ints.push(r.read_i32::<LittleEndian>()?);
    }
    let mut floats = Vec::new();
    for _ in schema.columns().iter().filter(|(_, t)| *t == ColumnType::Float64) {
        floats.push(r.read_f64::<LittleEndian>()?);
    }
    let mut strings = Vec::new();
    for _ in schema.columns().iter().filter(|(_, t)| *t == ColumnType::Str) {
        let len = r.read_u8()? as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        strings.push(buf);
    }

    let mut ints = ints.into_iter();
    let mut floats = floats.into_iter();
    let mut strings = strings.into_iter();
    let columns = schema
        .columns()
        .iter()
        .map(|(name, ty)| {
            let value = match ty {
                ColumnType::Int32 => ColumnValue::Int32(ints.next().unwrap()),
                ColumnType::Float64 => ColumnValue::Float64(floats.next().unwrap()),
                ColumnType::Str => ColumnValue::Str(strings.next().unwrap()),
            };
            (name.clone(), value)
        })
        .collect();

    Ok(Some(Row {
        vin_num,
        timestamp,
        columns,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            ("speed".into(), ColumnType::Int32),
            ("temp".into(), ColumnType::Float64),
            ("note".into(), ColumnType::Str),
        ])
        .unwrap()
    }

    fn sample_row(ts: i64) -> Row {
        Row {
            vin_num: 7,
            timestamp: ts,
            columns: vec![
                ("speed".into(), ColumnValue::Int32(42)),
                ("temp".into(), ColumnValue::Float64(3.5)),
                ("note".into(), ColumnValue::Str(b"hi".to_vec())),
            ],
        }
    }

    #[test]
    fn header_round_trips() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        read_header(&mut buf.as_slice(), "test").unwrap();
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = vec![0u8; HEADER_SIZE];
        assert!(read_header(&mut buf.as_slice(), "test").is_err());
    }

    #[test]
    fn row_round_trips_through_stream() {
        let schema = sample_schema();
        let mut buf = Vec::new();
        write_row(&mut buf, &schema, &sample_row(1000)).unwrap();
        write_row(&mut buf, &schema, &sample_row(2000)).unwrap();

        let mut cursor = buf.as_slice();
        let r1 = read_row(&mut cursor, &schema, 7).unwrap().unwrap();
        assert_eq!(r1, sample_row(1000));
        let r2 = read_row(&mut cursor, &schema, 7).unwrap().unwrap();
        assert_eq!(r2, sample_row(2000));
        assert!(read_row(&mut cursor, &schema, 7).unwrap().is_none());
    }

    #[test]
    fn truncated_row_is_an_error() {
        let schema = sample_schema();
        let mut buf = Vec::new();
        write_row(&mut buf, &schema, &sample_row(1000)).unwrap();
        buf.truncate(buf.len() - 1);
        let mut cursor = buf.as_slice();
        assert!(read_row(&mut cursor, &schema, 7).is_err());
    }
}
