//! Bin model and the planner abstraction shared by every column kind
//!
//! A planner turns a column plus the active filters into a [`BinSet`] with
//! two or three aggregate queries. Numeric and temporal planners produce
//! range bins keyed by `f64` or an instant; the categorical planner produces
//! frequency-ranked [`CategoryBin`]s. Every bin set is created fresh per
//! fetch and never patched afterwards.

use std::fmt::Debug;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use xf_core::filter::predicate::and_predicates;
use xf_core::{Filter, FilterValue, QueryEngine};

use crate::DataError;
use self::calendar::{format_full, format_label, LabelContext, TimeUnit};

pub mod calendar;
pub mod categorical;
pub mod numeric;
pub mod temporal;

#[cfg(test)]
pub(crate) mod fixtures;

pub use categorical::CategoricalBinPlanner;
pub use numeric::NumericBinPlanner;
pub use temporal::TemporalBinPlanner;

/// A single bin record of a bin set
pub trait BinRecord: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Type of the column values the bins range over
    type Key: Clone + Debug + PartialEq + Send + Sync + 'static;

    fn count(&self) -> u64;
}

/// Key type of range bins
pub trait BinKey: Copy + PartialOrd + Debug + Send + Sync + 'static {
    fn to_filter_value(self) -> FilterValue;

    /// Label of one bin within its set
    fn label(set: &BinSet<Bin<Self>>, bin: &Bin<Self>) -> String;

    /// Label spanning `first` through `last`
    fn range_label(set: &BinSet<Bin<Self>>, first: &Bin<Self>, last: &Bin<Self>) -> String;
}

/// A contiguous value range with its row count
///
/// Ranges are half-open `[start, end)` except the final bin of a set, which
/// includes `end`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bin<K> {
    pub start: K,
    pub end: K,
    pub count: u64,
}

impl<K: BinKey> BinRecord for Bin<K> {
    type Key = K;

    fn count(&self) -> u64 {
        self.count
    }
}

/// A categorical value with its row count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryBin {
    pub value: String,
    pub count: u64,
    pub is_other: bool,
    /// Number of distinct values folded into the "other" bucket
    pub other_distinct_count: Option<u64>,
}

impl BinRecord for CategoryBin {
    type Key = String;

    fn count(&self) -> u64 {
        self.count
    }
}

/// Result of one fetch for one column
#[derive(Debug, Clone, PartialEq)]
pub struct BinSet<B: BinRecord> {
    pub bins: Vec<B>,
    pub null_count: u64,
    pub total: u64,
    pub min: Option<B::Key>,
    pub max: Option<B::Key>,
    pub interval_unit: Option<TimeUnit>,
    pub is_single_value: bool,
    pub is_fallback_binning: bool,
    /// Categorical only: every non-null value is distinct
    pub is_all_unique: bool,
}

impl<B: BinRecord> BinSet<B> {
    /// A set without bins (zero rows, all null, or nothing parseable)
    pub fn empty(null_count: u64, total: u64) -> Self {
        Self {
            bins: Vec::new(),
            null_count,
            total,
            min: None,
            max: None,
            interval_unit: None,
            is_single_value: false,
            is_fallback_binning: false,
            is_all_unique: false,
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Sum of the bin counts
    pub fn binned_count(&self) -> u64 {
        self.bins.iter().map(BinRecord::count).sum()
    }
}

/// Read-only view of a bin set used by the selection state machine
pub trait SelectableBins: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count_at(&self, index: usize) -> Option<u64>;

    fn total(&self) -> u64;

    fn null_count(&self) -> u64;

    fn label_at(&self, index: usize) -> Option<String>;

    /// Label for the inclusive index range `start..=end`
    fn range_label(&self, start: usize, end: usize) -> Option<String>;

    /// Filter matching the rows of one bin
    fn filter_for_bin(&self, column: &str, index: usize) -> Option<Filter>;

    /// Filter matching the rows of the inclusive index range `start..=end`
    fn filter_for_range(&self, column: &str, start: usize, end: usize) -> Option<Filter>;

    fn filter_for_nulls(&self, column: &str) -> Option<Filter> {
        (self.null_count() > 0).then(|| Filter::null(column))
    }

    fn range_count(&self, start: usize, end: usize) -> u64 {
        (start..=end).filter_map(|i| self.count_at(i)).sum()
    }
}

fn valid_range(len: usize, start: usize, end: usize) -> bool {
    start <= end && end < len
}

impl<K: BinKey> SelectableBins for BinSet<Bin<K>> {
    fn len(&self) -> usize {
        self.bins.len()
    }

    fn count_at(&self, index: usize) -> Option<u64> {
        self.bins.get(index).map(|b| b.count)
    }

    fn total(&self) -> u64 {
        self.total
    }

    fn null_count(&self) -> u64 {
        self.null_count
    }

    fn label_at(&self, index: usize) -> Option<String> {
        self.bins.get(index).map(|bin| K::label(self, bin))
    }

    fn range_label(&self, start: usize, end: usize) -> Option<String> {
        if !valid_range(self.bins.len(), start, end) {
            return None;
        }
        if start == end {
            return self.label_at(start);
        }
        Some(K::range_label(self, &self.bins[start], &self.bins[end]))
    }

    fn filter_for_bin(&self, column: &str, index: usize) -> Option<Filter> {
        self.filter_for_range(column, index, index)
    }

    fn filter_for_range(&self, column: &str, start: usize, end: usize) -> Option<Filter> {
        if !valid_range(self.bins.len(), start, end) {
            return None;
        }
        let first = &self.bins[start];
        let last = &self.bins[end];
        if self.is_single_value {
            return Some(Filter::point(column, first.start.to_filter_value()));
        }
        if end == self.bins.len() - 1 {
            Some(Filter::closed_range(column, first.start.to_filter_value(), last.end.to_filter_value()))
        } else {
            Some(Filter::range(column, first.start.to_filter_value(), last.end.to_filter_value()))
        }
    }
}

impl SelectableBins for BinSet<CategoryBin> {
    fn len(&self) -> usize {
        self.bins.len()
    }

    fn count_at(&self, index: usize) -> Option<u64> {
        self.bins.get(index).map(|b| b.count)
    }

    fn total(&self) -> u64 {
        self.total
    }

    fn null_count(&self) -> u64 {
        self.null_count
    }

    fn label_at(&self, index: usize) -> Option<String> {
        self.bins.get(index).map(|bin| {
            if bin.is_other {
                match bin.other_distinct_count {
                    Some(n) => format!("Other ({} values)", n),
                    None => "Other".to_string(),
                }
            } else {
                bin.value.clone()
            }
        })
    }

    fn range_label(&self, start: usize, end: usize) -> Option<String> {
        if !valid_range(self.bins.len(), start, end) {
            return None;
        }
        if start == end {
            return self.label_at(start);
        }
        Some(format!("{} to {}", self.label_at(start)?, self.label_at(end)?))
    }

    fn filter_for_bin(&self, column: &str, index: usize) -> Option<Filter> {
        let bin = self.bins.get(index)?;
        if bin.is_other {
            Some(Filter::not_set(column, self.top_values(|_| true)))
        } else {
            Some(Filter::point(column, bin.value.as_str()))
        }
    }

    fn filter_for_range(&self, column: &str, start: usize, end: usize) -> Option<Filter> {
        if !valid_range(self.bins.len(), start, end) {
            return None;
        }
        let covers_other = self.bins[start..=end].iter().any(|b| b.is_other);
        if covers_other {
            let uncovered = self.top_values(|i| i < start || i > end);
            if uncovered.is_empty() {
                // every bar is covered, which is every non-null row
                return Some(Filter::not_null(column));
            }
            Some(Filter::not_set(column, uncovered))
        } else {
            Some(Filter::set(column, self.top_values(|i| i >= start && i <= end)))
        }
    }
}

impl BinSet<CategoryBin> {
    /// Materialized top values whose index passes `keep`
    fn top_values(&self, keep: impl Fn(usize) -> bool) -> Vec<FilterValue> {
        self.bins
            .iter()
            .enumerate()
            .filter(|(i, b)| !b.is_other && keep(*i))
            .map(|(_, b)| FilterValue::Text(b.value.clone()))
            .collect()
    }
}

impl BinKey for f64 {
    fn to_filter_value(self) -> FilterValue {
        FilterValue::Number(self)
    }

    fn label(set: &BinSet<Bin<f64>>, bin: &Bin<f64>) -> String {
        if set.is_single_value {
            format_number_label(bin.start)
        } else {
            format!("{} to {}", format_number_label(bin.start), format_number_label(bin.end))
        }
    }

    fn range_label(_set: &BinSet<Bin<f64>>, first: &Bin<f64>, last: &Bin<f64>) -> String {
        format!("{} to {}", format_number_label(first.start), format_number_label(last.end))
    }
}

impl BinKey for DateTime<Utc> {
    fn to_filter_value(self) -> FilterValue {
        FilterValue::Timestamp(self)
    }

    fn label(set: &BinSet<Bin<DateTime<Utc>>>, bin: &Bin<DateTime<Utc>>) -> String {
        match (set.is_single_value, set.is_fallback_binning, set.interval_unit) {
            (true, _, _) => format_full(bin.start),
            (false, true, _) | (false, false, None) => {
                format!("{} to {}", format_full(bin.start), format_full(bin.end))
            }
            (false, false, Some(unit)) => format_label(unit, bin.start, label_context(set)),
        }
    }

    fn range_label(set: &BinSet<Bin<DateTime<Utc>>>, first: &Bin<DateTime<Utc>>, last: &Bin<DateTime<Utc>>) -> String {
        match (set.is_fallback_binning, set.interval_unit) {
            (false, Some(unit)) => {
                let ctx = label_context(set);
                format!("{} to {}", format_label(unit, first.start, ctx), format_label(unit, last.start, ctx))
            }
            _ => format!("{} to {}", format_full(first.start), format_full(last.end)),
        }
    }
}

fn label_context(set: &BinSet<Bin<DateTime<Utc>>>) -> LabelContext {
    match (set.min, set.max) {
        (Some(min), Some(max)) => LabelContext::new(min, max),
        _ => LabelContext { same_year: false, same_day: false },
    }
}

/// Compact number label: at most two decimals, k/M/B suffixes for large values
pub fn format_number_label(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let abs = value.abs();
    let (scaled, suffix) = if abs >= 1e9 {
        (value / 1e9, "B")
    } else if abs >= 1e6 {
        (value / 1e6, "M")
    } else if abs >= 1e4 {
        (value / 1e3, "k")
    } else {
        (value, "")
    };

    let mut text = format!("{:.2}", scaled);
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    if text == "-0" {
        text = "0".to_string();
    }
    format!("{}{}", text, suffix)
}

/// Shared planning contract, parameterized over the produced bin type
#[async_trait]
pub trait BinPlanner: Send + Sync {
    type Bin: BinRecord;

    /// Column kind used in error context and logs
    fn kind(&self) -> &'static str;

    /// Build the bin set for `column` under `filters`
    async fn plan(
        &self,
        engine: &dyn QueryEngine,
        table: &str,
        column: &str,
        filters: &[Filter],
    ) -> Result<BinSet<Self::Bin>, DataError>;

    /// [`BinPlanner::plan`] with failures wrapped in fetch context
    async fn fetch(
        &self,
        engine: &dyn QueryEngine,
        table: &str,
        column: &str,
        filters: &[Filter],
    ) -> Result<BinSet<Self::Bin>, DataError> {
        let started = Instant::now();
        match self.plan(engine, table, column, filters).await {
            Ok(set) => {
                info!(
                    kind = self.kind(),
                    column,
                    bins = set.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fetched bins"
                );
                Ok(set)
            }
            Err(e) => Err(DataError::fetch(self.kind(), column, e)),
        }
    }
}

/// Run one planner query
pub(crate) async fn run_query(engine: &dyn QueryEngine, sql: &str) -> Result<RecordBatch, DataError> {
    debug!(engine = engine.engine_name(), %sql, "planner query");
    Ok(engine.query(sql).await?)
}

/// Require at least one row in an aggregate result
pub(crate) fn require_row(batch: &RecordBatch, what: &str) -> Result<(), DataError> {
    if batch.num_rows() == 0 {
        Err(DataError::EmptyResult(what.to_string()))
    } else {
        Ok(())
    }
}

/// ` WHERE ...` for the given predicate parts, or nothing
pub(crate) fn where_sql<I>(parts: I) -> String
where
    I: IntoIterator<Item = String>,
{
    and_predicates(parts)
        .map(|p| format!(" WHERE {}", p))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn numeric_set() -> BinSet<Bin<f64>> {
        BinSet {
            bins: vec![
                Bin { start: 0.0, end: 10.0, count: 3 },
                Bin { start: 10.0, end: 20.0, count: 0 },
                Bin { start: 20.0, end: 30.0, count: 5 },
            ],
            null_count: 2,
            total: 10,
            min: Some(0.0),
            max: Some(30.0),
            interval_unit: None,
            is_single_value: false,
            is_fallback_binning: false,
            is_all_unique: false,
        }
    }

    fn category_set() -> BinSet<CategoryBin> {
        let bin = |value: &str, count| CategoryBin {
            value: value.to_string(),
            count,
            is_other: false,
            other_distinct_count: None,
        };
        BinSet {
            bins: vec![
                bin("a", 5),
                bin("b", 3),
                CategoryBin { value: String::new(), count: 2, is_other: true, other_distinct_count: Some(4) },
            ],
            null_count: 1,
            total: 11,
            ..BinSet::empty(0, 0)
        }
    }

    #[test]
    fn test_numeric_filters_close_only_final_bin() {
        let set = numeric_set();
        assert_eq!(set.filter_for_bin("v", 0), Some(Filter::range("v", 0.0, 10.0)));
        assert_eq!(set.filter_for_bin("v", 2), Some(Filter::closed_range("v", 20.0, 30.0)));
        assert_eq!(set.filter_for_range("v", 1, 2), Some(Filter::closed_range("v", 10.0, 30.0)));
        assert_eq!(set.filter_for_range("v", 2, 3), None);
        assert_eq!(set.filter_for_range("v", 2, 1), None);
        assert_eq!(set.range_count(0, 2), 8);
        assert_eq!(set.filter_for_nulls("v"), Some(Filter::null("v")));
    }

    #[test]
    fn test_single_value_selects_point() {
        let set = BinSet {
            bins: vec![Bin { start: 42.0, end: 42.0, count: 7 }],
            is_single_value: true,
            ..numeric_set()
        };
        assert_eq!(set.filter_for_bin("v", 0), Some(Filter::point("v", 42.0)));
        assert_eq!(set.label_at(0).as_deref(), Some("42"));
    }

    #[test]
    fn test_category_filters() {
        let set = category_set();
        assert_eq!(set.filter_for_bin("c", 0), Some(Filter::point("c", "a")));
        assert_eq!(
            set.filter_for_bin("c", 2),
            Some(Filter::not_set("c", vec!["a".into(), "b".into()]))
        );
        assert_eq!(
            set.filter_for_range("c", 0, 1),
            Some(Filter::set("c", vec!["a".into(), "b".into()]))
        );
        assert_eq!(
            set.filter_for_range("c", 1, 2),
            Some(Filter::not_set("c", vec!["a".into()]))
        );
        assert_eq!(set.filter_for_range("c", 0, 2), Some(Filter::not_null("c")));
        assert_eq!(set.label_at(2).as_deref(), Some("Other (4 values)"));
    }

    #[test]
    fn test_temporal_labels_use_set_context() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let set = BinSet {
            bins: vec![
                Bin { start: jan, end: feb, count: 1 },
                Bin { start: feb, end: mar, count: 1 },
            ],
            null_count: 0,
            total: 2,
            min: Some(jan),
            max: Some(Utc.with_ymd_and_hms(2024, 2, 20, 0, 0, 0).unwrap()),
            interval_unit: Some(TimeUnit::Month),
            is_single_value: false,
            is_fallback_binning: false,
            is_all_unique: false,
        };
        assert_eq!(set.label_at(0).as_deref(), Some("Jan"));
        assert_eq!(set.range_label(0, 1).as_deref(), Some("Jan to Feb"));
        assert_eq!(set.filter_for_bin("t", 0), Some(Filter::range("t", jan, feb)));
    }

    #[test]
    fn test_number_labels() {
        assert_eq!(format_number_label(12.5), "12.5");
        assert_eq!(format_number_label(3.0), "3");
        assert_eq!(format_number_label(1.234), "1.23");
        assert_eq!(format_number_label(25_000.0), "25k");
        assert_eq!(format_number_label(1_500_000.0), "1.5M");
        assert_eq!(format_number_label(-0.001), "0");
    }
}
