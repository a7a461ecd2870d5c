//! Table schema: a fixed ordered list of `(name, type)` pairs, persisted as
//! text and never changed after table creation (spec.md §3, §3.2).

use crate::error::{EngineError, Result};
use crate::shard::SCHEMA_COLUMN_NUMS;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int32,
    Float64,
    Str,
}

impl ColumnType {
    fn as_text(&self) -> &'static str {
        match self {
            ColumnType::Int32 => "COLUMN_TYPE_INTEGER",
            ColumnType::Float64 => "COLUMN_TYPE_DOUBLE_FLOAT",
            ColumnType::Str => "COLUMN_TYPE_STRING",
        }
    }

    fn from_text(s: &str) -> Option<Self> {
        match s {
            "COLUMN_TYPE_INTEGER" => Some(ColumnType::Int32),
            "COLUMN_TYPE_DOUBLE_FLOAT" => Some(ColumnType::Float64),
            "COLUMN_TYPE_STRING" => Some(ColumnType::Str),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int32 | ColumnType::Float64)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    pub fn new(columns: Vec<(String, ColumnType)>) -> Result<Self> {
        if columns.is_empty() || columns.len() > SCHEMA_COLUMN_NUMS {
            return Err(EngineError::InvalidSchema(format!(
                "schema must have 1..={SCHEMA_COLUMN_NUMS} columns, got {}",
                columns.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for (name, _) in &columns {
            if !seen.insert(name.as_str()) {
                return Err(EngineError::InvalidSchema(format!(
                    "duplicate column name: {name}"
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == name)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut text = String::new();
        for (name, ty) in &self.columns {
            text.push_str(name);
            text.push(' ');
            text.push_str(ty.as_text());
            text.push('\n');
        }
        fs::write(path, text)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut columns = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let name = parts
                .next()
                .ok_or_else(|| EngineError::InvalidSchema(format!("malformed line: {line}")))?;
            let ty_text = parts
                .next()
                .ok_or_else(|| EngineError::InvalidSchema(format!("malformed line: {line}")))?;
            let ty = ColumnType::from_text(ty_text)
                .ok_or_else(|| EngineError::InvalidSchema(format!("unknown column type: {ty_text}")))?;
            columns.push((name.to_string(), ty));
        }
        Schema::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_text() {
        let schema = Schema::new(vec![
            ("speed".into(), ColumnType::Int32),
            ("temp".into(), ColumnType::Float64),
            ("note".into(), ColumnType::Str),
        ])
        .unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("schema.txt");
        schema.write_to(&path).unwrap();

        let loaded = Schema::read_from(&path).unwrap();
        assert_eq!(loaded.columns().len(), 3);
        assert_eq!(loaded.column_type("temp"), Some(ColumnType::Float64));
        assert_eq!(loaded.column_index("note"), Some(2));
    }

    #[test]
    fn rejects_too_many_columns() {
        let columns: Vec<_> = (0..70)
            .map(|i| (format!("c{i}"), ColumnType::Int32))
            .collect();
        assert!(Schema::new(columns).is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let columns = vec![
            ("speed".into(), ColumnType::Int32),
            ("speed".into(), ColumnType::Float64),
        ];
        assert!(Schema::new(columns).is_err());
    }
}
