//! An embeddable columnar time-series storage engine for a fixed
//! fleet-telemetry workload: fixed-cardinality vehicle shards, a bounded
//! ingest window, and a handful of query shapes over compressed per-column
//! blocks (spec.md §1–§2).
//!
//! [`Engine`] is the single entry point: `Engine::connect` opens (or
//! initializes) a data directory, [`Engine::create_table`] registers a
//! schema, [`Engine::write`] ingests rows, the four query methods answer
//! `latestQuery`/`timeRangeQuery`/`aggregateQuery`/`downsampleQuery`, and
//! `Engine::shutdown` drains the conversion pool and persists durable state.

pub mod block;
pub mod codec;
pub mod config;
pub mod converter;
pub mod engine;
pub mod error;
pub mod flush_writer;
pub mod index_manager;
pub mod latest_manager;
pub mod query;
pub mod row;
pub mod schema;
pub mod shard;
pub mod staging;
pub mod threadpool;
pub mod tsm;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::Engine;
pub use error::{CodecError, EngineError, Result, TsmError};
pub use query::{AggregateValue, Aggregator, CompareExpression, CompareOp};
pub use row::{ColumnValue, Row};
pub use schema::{ColumnType, Schema};
pub use shard::{decode_ts, decode_vin, encode_ts, encode_vin, ms_range_to_idx_range, VIN_LENGTH, VIN_NUM_RANGE};
