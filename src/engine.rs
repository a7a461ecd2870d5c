//! Orchestrator (spec.md §4.I): owns every table's shard state, routes
//! writes to per-shard flush writers, runs the conversion thread pool, and
//! answers the four query shapes.
//!
//! Tables are an ambient generalization spec.md's on-disk layout implies
//! but never spells out a path for (`createTable(name, schema)` exists in
//! §6 but the `<root>/...` layout has no table segment); each table gets its
//! own subdirectory of `data_dir` carrying that exact layout, so a
//! single-table deployment is bit-for-bit what spec.md §6 describes.

use crate::config::EngineConfig;
use crate::converter;
use crate::error::{EngineError, Result};
use crate::flush_writer::FlushWriter;
use crate::index_manager::IndexManager;
use crate::latest_manager::LatestManager;
use crate::query::{aggregate, downsample, range, AggregateValue, Aggregator, CompareExpression};
use crate::row::Row;
use crate::schema::{ColumnType, Schema};
use crate::shard::VIN_NUM_RANGE;
use crate::staging;
use crate::threadpool::ThreadPool;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument};

const FINISH_COMPACTION_MARKER: &str = "finish_compaction";
const LATEST_RECORDS_FILE: &str = "latest_records";
const SCHEMA_FILE: &str = "schema.txt";

struct TableHandle {
    name: String,
    dir: PathBuf,
    schema: Arc<Schema>,
    flush: Vec<Mutex<Option<FlushWriter>>>,
    index: IndexManager,
    latest: LatestManager,
    poisoned: Mutex<HashSet<u16>>,
}

impl TableHandle {
    fn submit_conversion(self: &Arc<Self>, pool: &ThreadPool, shard: u16, ordinal: u32) {
        let table = Arc::clone(self);
        pool.submit(move || {
            match converter::convert(&table.dir, shard, ordinal, &table.schema) {
                Ok(outcome) => {
                    if let Err(e) = table.index.record_conversion(shard, ordinal, &outcome.tsm_path) {
                        error!(table = %table.name, shard, ordinal, error = %e, "failed to index converted file");
                        table.poisoned.lock().unwrap().insert(shard);
                        return;
                    }
                    if let Some(row) = outcome.latest_row {
                        table.latest.offer(shard, row);
                    }
                    // Only safe to unlink the staging file now that the TSM
                    // file's index is published: between write_tsm_file and
                    // here, queries still fall back to the staging file.
                    if let Err(e) = fs::remove_file(&outcome.staging_path) {
                        error!(table = %table.name, shard, ordinal, error = %e, "failed to remove staging file after conversion");
                        table.poisoned.lock().unwrap().insert(shard);
                        return;
                    }
                    info!(table = %table.name, shard, ordinal, "converted staging file");
                }
                Err(e) => {
                    error!(table = %table.name, shard, ordinal, error = %e, "conversion failed");
                    table.poisoned.lock().unwrap().insert(shard);
                }
            }
        });
    }
}

/// The embeddable storage engine. Construct with `Engine::connect`, tear
/// down with `Engine::shutdown` (consuming, since the thread pool itself is
/// joined and consumed there).
pub struct Engine {
    config: EngineConfig,
    pool: ThreadPool,
    tables: Mutex<HashMap<String, Arc<TableHandle>>>,
}

impl Engine {
    /// Opens `config.data_dir`, rehydrating every table directory found
    /// inside it (latest records and the in-memory index are populated only
    /// for tables whose `finish_compaction` marker is present, per spec.md
    /// §3's "compaction has completed previously").
    #[instrument(skip(config))]
    pub fn connect(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let pool = ThreadPool::new(config.thread_pool_size);
        let mut tables = HashMap::new();

        for entry in fs::read_dir(&config.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            if !dir.join(SCHEMA_FILE).is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let handle = open_table(&name, dir)?;
            tables.insert(name, Arc::new(handle));
        }

        Ok(Self {
            config,
            pool,
            tables: Mutex::new(tables),
        })
    }

    /// Creates a new table: writes `schema.txt` and registers empty shard
    /// state. Fails if a table of this name already exists.
    #[instrument(skip(self, schema))]
    pub fn create_table(&self, name: &str, schema: Schema) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(name) {
            return Err(EngineError::InvalidSchema(format!("table {name} already exists")));
        }
        let dir = self.config.data_dir.join(name);
        fs::create_dir_all(&dir)?;
        schema.write_to(&dir.join(SCHEMA_FILE))?;

        let handle = TableHandle {
            name: name.to_string(),
            dir: dir.clone(),
            schema: Arc::new(schema),
            flush: (0..VIN_NUM_RANGE).map(|_| Mutex::new(None)).collect(),
            index: IndexManager::new(dir),
            latest: LatestManager::new(),
            poisoned: Mutex::new(HashSet::new()),
        };
        tables.insert(name.to_string(), Arc::new(handle));
        Ok(())
    }

    fn table(&self, name: &str) -> Result<Arc<TableHandle>> {
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTable(name.to_string()))
    }

    /// Routes every row to its shard's flush writer. Rows addressed to a
    /// shard that a prior conversion poisoned are rejected.
    pub fn write(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        let table = self.table(table)?;
        for row in rows {
            let shard = row.vin_num;
            if table.poisoned.lock().unwrap().contains(&shard) {
                return Err(EngineError::ShardPoisoned(shard));
            }
            let mut slot = table.flush[shard as usize].lock().unwrap();
            if slot.is_none() {
                let dir = table.dir.join("no-compaction").join(shard.to_string());
                *slot = Some(FlushWriter::open(dir, &table.schema)?);
            }
            let writer = slot.as_mut().unwrap();
            let pool = &self.pool;
            writer.append(&table.schema, &row, &mut |ordinal| {
                table.submit_conversion(pool, shard, ordinal);
            })?;
        }
        Ok(())
    }

    pub fn latest_query(&self, table: &str, vin_nums: &[u16], columns: &[String]) -> Result<Vec<Row>> {
        let table = self.table(table)?;
        if vin_nums.is_empty() {
            return Err(EngineError::EmptyRequest);
        }
        let mut out = Vec::with_capacity(vin_nums.len());
        for &shard in vin_nums {
            if let Some(row) = table.latest.latest(shard, columns) {
                out.push(row);
                continue;
            }
            if let Some(row) = scan_staging_latest(&table.dir, shard, &table.schema, columns)? {
                out.push(row);
            }
        }
        Ok(out)
    }

    pub fn time_range_query(
        &self,
        table: &str,
        vin_num: u16,
        ts_lo: i64,
        ts_hi: i64,
        columns: &[String],
    ) -> Result<Vec<Row>> {
        let table = self.table(table)?;
        range::time_range_query(&table.dir, &table.index, &table.schema, vin_num, vin_num, ts_lo, ts_hi, columns)
    }

    pub fn aggregate_query(
        &self,
        table: &str,
        vin_num: u16,
        column: &str,
        aggregator: Aggregator,
        ts_lo: i64,
        ts_hi: i64,
    ) -> Result<Option<(i64, AggregateValue)>> {
        let table = self.table(table)?;
        let column_type = table
            .schema
            .column_type(column)
            .filter(ColumnType::is_numeric)
            .ok_or_else(|| EngineError::InvalidSchema(format!("not a numeric column: {column}")))?;
        let value = aggregate::aggregate_query(&table.index, vin_num, column, column_type, aggregator, ts_lo, ts_hi)?;
        Ok(value.map(|v| (ts_lo, v)))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn downsample_query(
        &self,
        table: &str,
        vin_num: u16,
        column: &str,
        aggregator: Aggregator,
        filter: Option<&CompareExpression>,
        ts_lo: i64,
        ts_hi: i64,
        interval_ms: i64,
    ) -> Result<Vec<(i64, AggregateValue)>> {
        let table = self.table(table)?;
        let column_type = table
            .schema
            .column_type(column)
            .filter(ColumnType::is_numeric)
            .ok_or_else(|| EngineError::InvalidSchema(format!("not a numeric column: {column}")))?;
        downsample::downsample_query(
            &table.index,
            vin_num,
            column,
            column_type,
            aggregator,
            filter,
            ts_lo,
            ts_hi,
            interval_ms,
        )
    }

    /// Finalizes every table's writers (sealing partial staging files and
    /// submitting their conversion), waits for the pool to drain, then
    /// persists latest records and the `finish_compaction` marker per table.
    #[instrument(skip(self))]
    pub fn shutdown(self) -> Result<()> {
        let tables = self.tables.into_inner().unwrap();

        for table in tables.values() {
            for (shard, slot) in table.flush.iter().enumerate() {
                let mut slot = slot.lock().unwrap();
                if let Some(writer) = slot.as_mut() {
                    let pool = &self.pool;
                    writer.finalize(&mut |ordinal| {
                        table.submit_conversion(pool, shard as u16, ordinal);
                    })?;
                }
            }
        }

        self.pool.shutdown();

        for table in tables.values() {
            table.latest.persist(&table.dir.join(LATEST_RECORDS_FILE), &table.schema)?;
            fs::write(table.dir.join(FINISH_COMPACTION_MARKER), b"")?;
        }
        Ok(())
    }
}

fn open_table(name: &str, dir: PathBuf) -> Result<TableHandle> {
    let schema = Schema::read_from(&dir.join(SCHEMA_FILE))?;
    let index = IndexManager::new(dir.clone());
    let latest = LatestManager::new();

    if dir.join(FINISH_COMPACTION_MARKER).is_file() {
        for shard in 0..VIN_NUM_RANGE {
            index.load_shard(shard, &schema)?;
        }
        latest.load(&dir.join(LATEST_RECORDS_FILE), &schema)?;
    }

    Ok(TableHandle {
        name: name.to_string(),
        dir,
        schema: Arc::new(schema),
        flush: (0..VIN_NUM_RANGE).map(|_| Mutex::new(None)).collect(),
        index,
        latest,
        poisoned: Mutex::new(HashSet::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CompareOp;
    use crate::row::ColumnValue;
    use crate::shard::TS_BASE;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            ("col_i".into(), ColumnType::Int32),
            ("col_d".into(), ColumnType::Float64),
            ("col_s".into(), ColumnType::Str),
        ])
        .unwrap()
    }

    fn row(v: u16, ts: i64, i: i32, d: f64, s: &str) -> Row {
        Row {
            vin_num: v,
            timestamp: ts,
            columns: vec![
                ("col_i".into(), ColumnValue::Int32(i)),
                ("col_d".into(), ColumnValue::Float64(d)),
                ("col_s".into(), ColumnValue::Str(s.as_bytes().to_vec())),
            ],
        }
    }

    #[test]
    fn single_row_round_trips_through_shutdown_and_reopen() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::builder(dir.path()).thread_pool_size(2).build();

        let engine = Engine::connect(config.clone()).unwrap();
        engine.create_table("telemetry", schema()).unwrap();
        engine
            .write("telemetry", vec![row(0, TS_BASE, 42, 3.5, "hi")])
            .unwrap();
        engine.shutdown().unwrap();

        let engine = Engine::connect(config).unwrap();
        let rows = engine
            .time_range_query(
                "telemetry",
                0,
                TS_BASE,
                TS_BASE + 1,
                &["col_i".into(), "col_d".into(), "col_s".into()],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("col_i").unwrap().as_i32(), Some(42));
        assert_eq!(rows[0].get("col_d").unwrap().as_f64(), Some(3.5));
    }

    #[test]
    fn latest_query_reflects_the_newest_write() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::builder(dir.path()).thread_pool_size(2).build();

        let engine = Engine::connect(config.clone()).unwrap();
        engine.create_table("telemetry", schema()).unwrap();
        engine
            .write("telemetry", vec![row(0, TS_BASE, 1, 0.0, "")])
            .unwrap();
        engine
            .write("telemetry", vec![row(0, TS_BASE + 1000, 2, 0.0, "")])
            .unwrap();
        engine.shutdown().unwrap();

        let engine = Engine::connect(config).unwrap();
        let rows = engine.latest_query("telemetry", &[0], &["col_i".into()]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, TS_BASE + 1000);
        assert_eq!(rows[0].get("col_i").unwrap().as_i32(), Some(2));
    }

    #[test]
    fn max_aggregate_over_a_sparse_block() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::builder(dir.path()).thread_pool_size(2).build();

        let engine = Engine::connect(config.clone()).unwrap();
        engine.create_table("telemetry", schema()).unwrap();
        let rows: Vec<Row> = (0..2500)
            .map(|k| row(0, TS_BASE + k * 1000, k as i32, 0.0, ""))
            .collect();
        engine.write("telemetry", rows).unwrap();
        engine.shutdown().unwrap();

        let engine = Engine::connect(config).unwrap();
        let (_, value) = engine
            .aggregate_query("telemetry", 0, "col_i", Aggregator::Max, TS_BASE, TS_BASE + 2500 * 1000)
            .unwrap()
            .unwrap();
        assert_eq!(value, AggregateValue::Int(2499));
    }

    #[test]
    fn avg_over_i32_promotes_to_i64_without_overflow() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::builder(dir.path()).thread_pool_size(2).build();

        let engine = Engine::connect(config.clone()).unwrap();
        engine.create_table("telemetry", schema()).unwrap();
        let rows: Vec<Row> = (0..100)
            .map(|k| row(0, TS_BASE + k * 1000, i32::MAX, 0.0, ""))
            .collect();
        engine.write("telemetry", rows).unwrap();
        engine.shutdown().unwrap();

        let engine = Engine::connect(config).unwrap();
        let (_, value) = engine
            .aggregate_query("telemetry", 0, "col_i", Aggregator::Avg, TS_BASE, TS_BASE + 100 * 1000)
            .unwrap()
            .unwrap();
        assert_eq!(value, AggregateValue::Float(i32::MAX as f64));
    }

    #[test]
    fn downsample_emits_filter_all_sentinel_rows() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::builder(dir.path()).thread_pool_size(2).build();

        let engine = Engine::connect(config.clone()).unwrap();
        engine.create_table("telemetry", schema()).unwrap();
        let rows: Vec<Row> = (0..100)
            .map(|k| row(0, TS_BASE + k * 1000, 0, 0.0, ""))
            .collect();
        engine.write("telemetry", rows).unwrap();
        engine.shutdown().unwrap();

        let engine = Engine::connect(config).unwrap();
        let filter = CompareExpression {
            op: CompareOp::Gt,
            operand: ColumnValue::Float64(1.0),
        };
        let points = engine
            .downsample_query(
                "telemetry",
                0,
                "col_d",
                Aggregator::Avg,
                Some(&filter),
                TS_BASE,
                TS_BASE + 100 * 1000,
                10_000,
            )
            .unwrap();
        assert_eq!(points.len(), 10);
        for (_, v) in points {
            match v {
                AggregateValue::Float(f) => assert!(f.is_nan()),
                AggregateValue::Int(_) => panic!("expected a float sentinel"),
            }
        }
    }

    #[test]
    fn time_range_spans_a_tsm_file_boundary() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::builder(dir.path()).thread_pool_size(2).build();

        let engine = Engine::connect(config.clone()).unwrap();
        engine.create_table("telemetry", schema()).unwrap();
        let rows: Vec<Row> = (0..36_000)
            .map(|k| row(0, TS_BASE + k * 1000, k as i32, 0.0, ""))
            .collect();
        engine.write("telemetry", rows).unwrap();
        engine.shutdown().unwrap();

        let engine = Engine::connect(config).unwrap();
        let lo = TS_BASE + 17_000 * 1000;
        let hi = lo + 2_000 * 1000;
        let rows = engine.time_range_query("telemetry", 0, lo, hi, &["col_i".into()]).unwrap();
        assert_eq!(rows.len(), 2000);
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn write_before_conversion_is_visible_immediately() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::builder(dir.path()).thread_pool_size(2).build();
        let engine = Engine::connect(config).unwrap();
        engine.create_table("telemetry", schema()).unwrap();
        engine
            .write("telemetry", vec![row(0, TS_BASE, 7, 1.0, "x")])
            .unwrap();

        // No shutdown yet: this staging file is far below FLUSH_SIZE, so the
        // row is still unconverted. It must still be visible.
        let rows = engine
            .time_range_query("telemetry", 0, TS_BASE, TS_BASE + 1, &["col_i".into()])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("col_i").unwrap().as_i32(), Some(7));
        engine.shutdown().unwrap();
    }

    #[test]
    fn unknown_table_is_rejected() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::builder(dir.path()).build();
        let engine = Engine::connect(config).unwrap();
        let err = engine.write("nope", vec![row(0, TS_BASE, 1, 0.0, "")]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTable(_)));
    }
}

fn scan_staging_latest(dir: &Path, shard: u16, schema: &Schema, columns: &[String]) -> Result<Option<Row>> {
    let shard_dir = dir.join("no-compaction").join(shard.to_string());
    if !shard_dir.is_dir() {
        return Ok(None);
    }
    let mut best: Option<Row> = None;
    for entry in fs::read_dir(&shard_dir)? {
        let path = entry?.path();
        let bytes = fs::read(&path)?;
        let mut cursor = bytes.as_slice();
        let path_str = path.display().to_string();
        if staging::read_header(&mut cursor, &path_str).is_err() {
            continue;
        }
        // Tolerate a truncated trailing row the same way `range::scan_staging`
        // does: a concurrent writer may be mid-append, and a torn tail is not
        // corruption, just the last row not being visible yet.
        while let Ok(Some(row)) = staging::read_row(&mut cursor, schema, shard) {
            if best.as_ref().map_or(true, |b| row.timestamp > b.timestamp) {
                best = Some(row);
            }
        }
    }
    Ok(best.map(|row| Row {
        vin_num: row.vin_num,
        timestamp: row.timestamp,
        columns: columns
            .iter()
            .filter_map(|name| row.get(name).map(|v| (name.clone(), v.clone())))
            .collect(),
    }))
}
