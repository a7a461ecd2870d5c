//! Row: the ingest-time and query-result unit (spec.md §3). Rows exist only
//! transiently — they are serialized into staging files on write and
//! reconstructed from decoded columns on query.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Int32(i32),
    Float64(f64),
    Str(Vec<u8>),
}

impl ColumnValue {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ColumnValue::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Float64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Int32(v) => write!(f, "{v}"),
            ColumnValue::Float64(v) => write!(f, "{v}"),
            ColumnValue::Str(v) => write!(f, "{:?}", String::from_utf8_lossy(v)),
        }
    }
}

/// A single row: shard id, millisecond timestamp, and a column-name-keyed
/// projection (never the full schema unless every column was requested).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub vin_num: u16,
    pub timestamp: i64,
    pub columns: Vec<(String, ColumnValue)>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}
