//! Latest manager (spec.md §4.F): tracks, per shard, the row with the
//! greatest timestamp seen so far, and persists/rehydrates it via the
//! `latest_records` file (custom binary format, SPEC_FULL.md §4.F — modelled
//! on the teacher's hand-rolled `common::Position::read_from`/`write_to`).

use crate::error::{EngineError, Result};
use crate::row::{ColumnValue, Row};
use crate::schema::{ColumnType, Schema};
use crate::shard::VIN_NUM_RANGE;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;

const MAGIC: u32 = 0x4C54_5354; // "LTST" in byte value, endian-agnostic as a tag

pub struct LatestManager {
    slots: Vec<Mutex<Option<Row>>>,
}

impl LatestManager {
    pub fn new() -> Self {
        Self {
            slots: (0..VIN_NUM_RANGE).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// Folds a candidate row into shard `shard`'s slot if it is newer than
    /// what is already there — the compare-and-replace-if-newer publication
    /// the thread pool's commutativity argument (SPEC_FULL.md §5) relies on.
    pub fn offer(&self, shard: u16, candidate: Row) {
        let mut slot = self.slots[shard as usize].lock().unwrap();
        let replace = match slot.as_ref() {
            Some(current) => candidate.timestamp > current.timestamp,
            None => true,
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    /// Projects shard `shard`'s latest row onto `columns`, or `None` if the
    /// shard has never had a row (or compaction hasn't reached it yet —
    /// callers fall back to the staging-file scan in that case).
    pub fn latest(&self, shard: u16, columns: &[String]) -> Option<Row> {
        let slot = self.slots[shard as usize].lock().unwrap();
        slot.as_ref().map(|row| Row {
            vin_num: row.vin_num,
            timestamp: row.timestamp,
            columns: columns
                .iter()
                .filter_map(|name| row.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
        })
    }

    /// Serializes every populated shard slot: `[magic: u32][count:
    /// u32][(vin_num: u16, has_row: u8, row)*]`. Rows are written in full
    /// schema order so that they can be rehydrated without a staging-file
    /// rescan.
    pub fn persist(&self, path: &Path, schema: &Schema) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_u32::<LittleEndian>(MAGIC)?;

        let present: Vec<(u16, &Mutex<Option<Row>>)> = self
            .slots
            .iter()
            .enumerate()
            .map(|(i, m)| (i as u16, m))
            .collect();

        w.write_u32::<LittleEndian>(present.len() as u32)?;
        for (vin_num, slot) in present {
            let guard = slot.lock().unwrap();
            w.write_u16::<LittleEndian>(vin_num)?;
            match guard.as_ref() {
                Some(row) => {
                    w.write_u8(1)?;
                    write_full_row(&mut w, schema, row)?;
                }
                None => w.write_u8(0)?,
            }
        }
        w.flush()?;
        w.get_ref().sync_all()?;
        Ok(())
    }

    /// Rehydrates slots from a `latest_records` file. A missing, truncated,
    /// or bad-magic file is treated as "no prior latest state" — this file
    /// is a cache, never a source of truth — and simply leaves every slot
    /// empty rather than returning an error.
    pub fn load(&self, path: &Path, schema: &Schema) -> Result<()> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return Ok(()),
        };
        let mut r = BufReader::new(file);
        if try_load(&mut r, schema, &self.slots).is_err() {
            for slot in &self.slots {
                *slot.lock().unwrap() = None;
            }
        }
        Ok(())
    }
}

fn try_load(r: &mut impl Read, schema: &Schema, slots: &[Mutex<Option<Row>>]) -> Result<()> {
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != MAGIC {
        return Err(EngineError::Internal("bad latest_records magic".into()));
    }
    let count = r.read_u32::<LittleEndian>()?;
    for _ in 0..count {
        let vin_num = r.read_u16::<LittleEndian>()?;
        let has_row = r.read_u8()?;
        if has_row == 1 {
            let row = read_full_row(r, schema, vin_num)?;
            if let Some(slot) = slots.get(vin_num as usize) {
                *slot.lock().unwrap() = Some(row);
            }
        }
    }
    Ok(())
}

fn write_full_row(w: &mut impl Write, schema: &Schema, row: &Row) -> Result<()> {
    w.write_i64::<LittleEndian>(row.timestamp)?;
    for (name, ty) in schema.columns() {
        match (ty, row.get(name)) {
            (ColumnType::Int32, Some(ColumnValue::Int32(v))) => w.write_i32::<LittleEndian>(*v)?,
            (ColumnType::Float64, Some(ColumnValue::Float64(v))) => w.write_f64::<LittleEndian>(*v)?,
            (ColumnType::Str, Some(ColumnValue::Str(v))) => {
                w.write_u8(v.len() as u8)?;
                w.write_all(v)?;
            }
            _ => return Err(EngineError::Internal(format!("latest row missing column {name}"))),
        }
    }
    Ok(())
}

fn read_full_row(r: &mut impl Read, schema: &Schema, vin_num: u16) -> Result<Row> {
    let timestamp = r.read_i64::<LittleEndian>()?;
    let mut columns = Vec::with_capacity(schema.columns().len());
    for (name, ty) in schema.columns() {
        let value = match ty {
            ColumnType::Int32 => ColumnValue::Int32(r.read_i32::<LittleEndian>()?),
            ColumnType::Float64 => ColumnValue::Float64(r.read_f64::<LittleEndian>()?),
            ColumnType::Str => {
                let len = r.read_u8()? as usize;
                let mut buf = vec![0u8; len];
                r.read_exact(&mut buf)?;
                ColumnValue::Str(buf)
            }
        };
        columns.push((name.clone(), value));
    }
    Ok(Row {
        vin_num,
        timestamp,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![("speed".into(), ColumnType::Int32)]).unwrap()
    }

    fn row(vin: u16, ts: i64, speed: i32) -> Row {
        Row {
            vin_num: vin,
            timestamp: ts,
            columns: vec![("speed".into(), ColumnValue::Int32(speed))],
        }
    }

    #[test]
    fn offer_keeps_the_newest_row() {
        let mgr = LatestManager::new();
        mgr.offer(3, row(3, 1000, 1));
        mgr.offer(3, row(3, 500, 99));
        mgr.offer(3, row(3, 2000, 2));
        let latest = mgr.latest(3, &["speed".to_string()]).unwrap();
        assert_eq!(latest.timestamp, 2000);
        assert_eq!(latest.get("speed").unwrap().as_i32(), Some(2));
    }

    #[test]
    fn persists_and_reloads() {
        let mgr = LatestManager::new();
        mgr.offer(10, row(10, 1234, 7));
        let schema = schema();

        let dir = tempdir().unwrap();
        let path = dir.path().join("latest_records");
        mgr.persist(&path, &schema).unwrap();

        let reloaded = LatestManager::new();
        reloaded.load(&path, &schema).unwrap();
        let latest = reloaded.latest(10, &["speed".to_string()]).unwrap();
        assert_eq!(latest.timestamp, 1234);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let mgr = LatestManager::new();
        let dir = tempdir().unwrap();
        mgr.load(&dir.path().join("does-not-exist"), &schema()).unwrap();
        assert!(mgr.latest(0, &["speed".to_string()]).is_none());
    }
}
