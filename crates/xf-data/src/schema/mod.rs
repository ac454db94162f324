//! Column kind detection

use std::fmt;

use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xf_core::filter::predicate::quote_identifier;

use crate::batch::string_value;
use crate::bins::calendar::parse_instant;
use crate::sources::SqliteEngine;
use crate::DataError;

/// Which planner a column is binned with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Temporal,
    Categorical,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Temporal => "temporal",
            ColumnKind::Categorical => "categorical",
        };
        f.write_str(name)
    }
}

impl ColumnKind {
    /// Kind implied by an Arrow type, if any
    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float16
            | DataType::Float32
            | DataType::Float64
            | DataType::Decimal128(_, _)
            | DataType::Decimal256(_, _) => Some(ColumnKind::Numeric),
            DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => Some(ColumnKind::Temporal),
            DataType::Boolean | DataType::Dictionary(_, _) => Some(ColumnKind::Categorical),
            _ => None,
        }
    }

    /// Kind implied by a SQLite declared type, if any
    ///
    /// Follows SQLite affinity names; plain text or missing declarations
    /// need sampling.
    pub fn from_declared_type(declared: &str) -> Option<Self> {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("DATE") || upper.contains("TIME") {
            Some(ColumnKind::Temporal)
        } else if upper.contains("BOOL") {
            Some(ColumnKind::Categorical)
        } else if upper.contains("INT")
            || upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUM")
            || upper.contains("DEC")
        {
            Some(ColumnKind::Numeric)
        } else {
            None
        }
    }
}

/// A table column with its detected kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnKind,
}

/// Detects column kinds from declarations, falling back to value samples
pub struct SchemaDetector {
    sample_size: usize,
}

impl SchemaDetector {
    pub fn new() -> Self {
        Self { sample_size: 1000 }
    }

    /// Set the sample size for detection
    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size.max(1);
        self
    }

    /// Detect the kind of every column of `table`
    pub fn detect(&self, engine: &SqliteEngine, table: &str) -> Result<Vec<ColumnSchema>, DataError> {
        let mut schema = Vec::new();
        for column in engine.table_columns(table)? {
            let kind = match ColumnKind::from_declared_type(&column.declared_type) {
                Some(kind) => kind,
                None => {
                    let samples = self.sample(engine, table, &column.name)?;
                    self.detect_from_samples(&samples)
                }
            };
            debug!(table, column = %column.name, declared = %column.declared_type, %kind, "detected column kind");
            schema.push(ColumnSchema { name: column.name, kind });
        }
        Ok(schema)
    }

    fn sample(&self, engine: &SqliteEngine, table: &str, column: &str) -> Result<Vec<String>, DataError> {
        let column = quote_identifier(column);
        let sql = format!(
            "SELECT {col} AS v FROM {table} WHERE {col} IS NOT NULL LIMIT {limit}",
            col = column,
            table = quote_identifier(table),
            limit = self.sample_size,
        );
        let batch = engine.query_blocking(&sql)?;
        let mut values = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            if let Some(v) = string_value(&batch, "v", row)? {
                values.push(v);
            }
        }
        Ok(values)
    }

    /// Classify non-null sample values
    ///
    /// All-numeric samples are numeric, all-instant samples temporal,
    /// anything else (including no samples) categorical.
    pub fn detect_from_samples(&self, samples: &[String]) -> ColumnKind {
        let values: Vec<&str> = samples
            .iter()
            .take(self.sample_size)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if values.is_empty() {
            return ColumnKind::Categorical;
        }

        if values.iter().all(|v| v.parse::<f64>().is_ok()) {
            ColumnKind::Numeric
        } else if values.iter().all(|v| Self::looks_like_instant(v)) {
            ColumnKind::Temporal
        } else {
            ColumnKind::Categorical
        }
    }

    fn looks_like_instant(value: &str) -> bool {
        value.contains(['-', ':', '/', ',']) && parse_instant(value).is_some()
    }
}

impl Default for SchemaDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_declared_types() {
        assert_eq!(ColumnKind::from_declared_type("INTEGER"), Some(ColumnKind::Numeric));
        assert_eq!(ColumnKind::from_declared_type("double precision"), Some(ColumnKind::Numeric));
        assert_eq!(ColumnKind::from_declared_type("DATETIME"), Some(ColumnKind::Temporal));
        assert_eq!(ColumnKind::from_declared_type("BOOLEAN"), Some(ColumnKind::Categorical));
        assert_eq!(ColumnKind::from_declared_type("TEXT"), None);
        assert_eq!(
            ColumnKind::from_data_type(&DataType::Float32),
            Some(ColumnKind::Numeric)
        );
    }

    #[test]
    fn test_sample_classification() {
        let detector = SchemaDetector::new();
        assert_eq!(detector.detect_from_samples(&strings(&["1", "2.5", " 3 "])), ColumnKind::Numeric);
        assert_eq!(
            detector.detect_from_samples(&strings(&["2024-01-01", "2024-02-03T10:00:00Z"])),
            ColumnKind::Temporal
        );
        assert_eq!(detector.detect_from_samples(&strings(&["red", "2024-01-01"])), ColumnKind::Categorical);
        assert_eq!(
            detector.detect_from_samples(&strings(&["03/05/2024", "March 7, 2024", "25/03/2024 17:02:03"])),
            ColumnKind::Temporal
        );
        // compact dates are indistinguishable from integers
        assert_eq!(detector.detect_from_samples(&strings(&["20240305", "20240306"])), ColumnKind::Numeric);
        assert_eq!(detector.detect_from_samples(&[]), ColumnKind::Categorical);
    }

    #[test]
    fn test_detect_table() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .execute_batch(
                "CREATE TABLE sales (price REAL, sold_at TEXT, region TEXT, qty);
                 INSERT INTO sales VALUES (9.5, '2024-01-01T10:00:00Z', 'north', 3);
                 INSERT INTO sales VALUES (12.0, '2024-01-02T11:00:00Z', 'south', 4);",
            )
            .unwrap();
        let schema = SchemaDetector::new().detect(&engine, "sales").unwrap();
        let kinds: Vec<ColumnKind> = schema.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ColumnKind::Numeric, ColumnKind::Temporal, ColumnKind::Categorical, ColumnKind::Numeric]
        );
    }
}
