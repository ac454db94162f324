//! Bin planning and query plumbing for the crossfilter column widgets

pub mod batch;
pub mod bins;
pub mod schema;
pub mod sources;

use arrow::error::ArrowError;
use tokio::task::JoinError;
use thiserror::Error;

// Re-exports
pub use bins::{
    Bin, BinKey, BinPlanner, BinRecord, BinSet, CategoryBin, SelectableBins,
    CategoricalBinPlanner, NumericBinPlanner, TemporalBinPlanner,
};
pub use bins::calendar::{TimeUnit, detect_interval, adjust_for_cap};
pub use bins::numeric::{bin_count_with, calculate_optimal_bins};
pub use schema::{ColumnKind, ColumnSchema, SchemaDetector};
pub use sources::{SqliteEngine, TableColumn};

/// Errors that can occur in data operations
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Query engine error: {0}")]
    Engine(anyhow::Error),

    #[error("Query result has no column `{0}`")]
    MissingColumn(String),

    #[error("Column `{column}` has unexpected type {data_type}")]
    UnexpectedType { column: String, data_type: String },

    #[error("Query returned no rows: {0}")]
    EmptyResult(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Unknown time unit `{0}`")]
    UnknownTimeUnit(String),

    #[error("failed to fetch {kind} data for column {column}")]
    Fetch {
        kind: &'static str,
        column: String,
        #[source]
        source: Box<DataError>,
    },

    #[error("Join error: {0}")]
    Join(#[from] JoinError),
}

impl From<anyhow::Error> for DataError {
    fn from(error: anyhow::Error) -> Self {
        DataError::Engine(error)
    }
}

impl DataError {
    /// Wrap an error with the column fetch it interrupted
    pub fn fetch(kind: &'static str, column: &str, source: DataError) -> Self {
        DataError::Fetch {
            kind,
            column: column.to_string(),
            source: Box::new(source),
        }
    }
}
