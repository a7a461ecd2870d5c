//! Error taxonomy for the engine, following the five kinds of §7: bad input,
//! not-found (modelled as `Ok(empty)`, never an error), transient I/O (retried
//! before surfacing), corruption and internal invariant violations (both
//! fatal, both surfaced here).

use std::io;
use thiserror::Error;

/// Errors returned from the codec layer (block encode/decode).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("unknown codec tag: {0}")]
    UnknownTag(u8),

    #[error("decompressed length {actual} does not match announced length {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("zstd error: {0}")]
    Zstd(#[from] io::Error),

    #[error("value out of range for codec: {0}")]
    OutOfRange(String),

    #[error("truncated block payload")]
    Truncated,
}

/// Errors returned from the TSM file format layer (§4.B, §7.4).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TsmError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("footer mismatch in {0}: index_offset/footer_offset out of bounds")]
    BadFooter(String),

    #[error("index block for column {0} not found in {1}")]
    ColumnNotFound(String, String),

    #[error("index entry count {found} does not match expected data block count {expected} for column {column}")]
    IndexEntryCountMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Top-level engine error, returned by every public entry point in §6.
///
/// `code()` maps each variant onto the small integer status-code ABI
/// described by the spec: 0 is reserved for success and is never returned
/// from here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid shard id")]
    InvalidShard,

    #[error("empty request")]
    EmptyRequest,

    #[error("downsample interval does not evenly divide the requested range")]
    MisalignedInterval,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Tsm(#[from] TsmError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("shard {0} poisoned by a prior fatal conversion error")]
    ShardPoisoned(u16),

    #[error("corrupt staging file {0}: bad header")]
    CorruptStaging(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl EngineError {
    /// Maps this error onto the integer status-code ABI of spec.md §6:
    /// non-zero codes grouped by the §7 error kind.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::UnknownTable(_) => 1,
            EngineError::InvalidSchema(_) => 2,
            EngineError::InvalidShard => 3,
            EngineError::EmptyRequest => 4,
            EngineError::MisalignedInterval => 5,
            EngineError::Io(_) => 10,
            EngineError::Tsm(_) | EngineError::Codec(_) => 11,
            EngineError::ShardPoisoned(_) => 12,
            EngineError::CorruptStaging(_) => 13,
            EngineError::Internal(_) => 99,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
