//! Core functionality for the crossfilter column widgets
//!
//! This crate provides the filter model, predicate translation, the event
//! bus and the shared filter state that every column visualization reads.

pub mod events;
pub mod filter;
pub mod state;
pub mod sync;

// Re-export commonly used types
pub use events::{EventBus, Event, EventHandler, handler_from_fn};
pub use filter::{Filter, FilterKind, FilterValue};
pub use filter::predicate::{to_predicate, to_where_clause, combine_predicates};
pub use state::{WidgetSettings, BinningSettings, InteractionSettings, CrossfilterSettings, BinStrategy, ConfigError};
pub use sync::{FilterStore, CancelStack};
pub use data::QueryEngine;

pub mod data {
    use arrow::record_batch::RecordBatch;

    /// Trait for the external query engine the planners aggregate through.
    ///
    /// The dialect is expected to understand `GROUP BY`, `quantile_cont(x, q)`,
    /// `date_trunc(unit, ts)` and `epoch_ms(ts)`.
    #[async_trait::async_trait]
    pub trait QueryEngine: Send + Sync {
        /// Run a query and collect every row into one batch
        async fn query(&self, sql: &str) -> anyhow::Result<RecordBatch>;

        /// Get the engine name for diagnostics
        fn engine_name(&self) -> &str;
    }
}
