//! Equal-width histogram bins for numeric columns

use async_trait::async_trait;
use tracing::debug;
use xf_core::filter::predicate::{combine_predicates, format_number, quote_identifier};
use xf_core::{BinStrategy, BinningSettings, Filter, QueryEngine};

use super::{require_row, run_query, where_sql, Bin, BinKey, BinPlanner, BinSet};
use crate::batch::{count_value, f64_value, i64_value};
use crate::DataError;

/// Bin count floor applied by [`calculate_optimal_bins`]
pub const DEFAULT_MIN_BINS: usize = 5;

/// Optimal bin count for a numeric distribution
///
/// One bin for degenerate data (`count <= 1` or `min == max`), otherwise
/// Freedman-Diaconis when the IQR is positive and Sturges' rule when it is
/// not, clamped to `[5, max_bins]`.
pub fn calculate_optimal_bins(min: f64, max: f64, count: u64, iqr: f64, max_bins: usize) -> usize {
    bin_count_with(BinStrategy::Auto, min, max, count, iqr, DEFAULT_MIN_BINS, max_bins)
}

/// Bin count under an explicit rule
///
/// `Fixed` ignores `min_bins`; every other rule is clamped to
/// `[min_bins, max_bins]`.
pub fn bin_count_with(
    strategy: BinStrategy,
    min: f64,
    max: f64,
    count: u64,
    iqr: f64,
    min_bins: usize,
    max_bins: usize,
) -> usize {
    let max_bins = max_bins.max(1);
    if count <= 1 || min == max || !min.is_finite() || !max.is_finite() {
        return 1;
    }

    let n = count as f64;
    let sturges = (n.log2() + 1.0).ceil();
    let freedman_diaconis = || {
        let width = 2.0 * iqr / n.cbrt();
        ((max - min) / width).ceil()
    };

    let raw = match strategy {
        BinStrategy::Auto | BinStrategy::FreedmanDiaconis if iqr > 0.0 => freedman_diaconis(),
        BinStrategy::Auto | BinStrategy::FreedmanDiaconis | BinStrategy::Sturges => sturges,
        BinStrategy::SquareRoot => n.sqrt().ceil(),
        BinStrategy::Fixed(bins) => return bins.clamp(1, max_bins),
    };

    let raw = if raw.is_finite() && raw > 0.0 { raw as usize } else { 1 };
    raw.clamp(min_bins.min(max_bins), max_bins)
}

/// Summary statistics of a numeric value expression
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NumericStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Rows where the value expression is non-null
    pub value_count: u64,
    /// Rows where the raw column is non-null
    pub non_null_count: u64,
    pub total: u64,
    pub q1: Option<f64>,
    pub q3: Option<f64>,
}

impl NumericStats {
    pub fn null_count(&self) -> u64 {
        self.total.saturating_sub(self.non_null_count)
    }

    pub fn iqr(&self) -> f64 {
        match (self.q1, self.q3) {
            (Some(q1), Some(q3)) if q3 > q1 => q3 - q1,
            _ => 0.0,
        }
    }
}

/// One aggregate query over `value_expr` for min, max, counts and quartiles
pub(crate) async fn query_numeric_stats(
    engine: &dyn QueryEngine,
    table: &str,
    column: &str,
    value_expr: &str,
    predicate: Option<&str>,
) -> Result<NumericStats, DataError> {
    let sql = format!(
        "SELECT MIN({v}) AS min_value, MAX({v}) AS max_value, COUNT({v}) AS value_count, \
         COUNT({c}) AS non_null_count, COUNT(*) AS total_count, \
         quantile_cont({v}, 0.25) AS q1, quantile_cont({v}, 0.75) AS q3 \
         FROM {t}{w}",
        v = value_expr,
        c = quote_identifier(column),
        t = quote_identifier(table),
        w = where_sql(predicate.map(str::to_string)),
    );
    let batch = run_query(engine, &sql).await?;
    require_row(&batch, "numeric stats")?;

    Ok(NumericStats {
        min: f64_value(&batch, "min_value", 0)?,
        max: f64_value(&batch, "max_value", 0)?,
        value_count: count_value(&batch, "value_count", 0)?,
        non_null_count: count_value(&batch, "non_null_count", 0)?,
        total: count_value(&batch, "total_count", 0)?,
        q1: f64_value(&batch, "q1", 0)?,
        q3: f64_value(&batch, "q3", 0)?,
    })
}

/// Edges of `bins` equal-width bins over `[min, max]`
///
/// Returns `bins + 1` values; the last is exactly `max`.
pub(crate) fn equal_width_edges(min: f64, max: f64, bins: usize) -> Vec<f64> {
    let n = bins.max(1);
    let span = max - min;
    (0..=n)
        .map(|i| if i == n { max } else { min + span * i as f64 / n as f64 })
        .collect()
}

/// Per-bin row counts for the bins between consecutive `edges`
///
/// A row lands in the first bin whose end exceeds it, and in the last bin
/// otherwise. The edges render through [`format_number`] exactly as the bin
/// filters do, so a bin's count is the number of rows its filter selects.
/// Bins absent from the grouped result are zero-filled.
pub(crate) async fn query_bin_counts(
    engine: &dyn QueryEngine,
    table: &str,
    value_expr: &str,
    predicate: Option<&str>,
    edges: &[f64],
) -> Result<Vec<u64>, DataError> {
    let bins = edges.len().saturating_sub(1);
    if bins == 0 {
        return Ok(Vec::new());
    }
    let last = bins - 1;
    let bin_index = if bins == 1 {
        "0".to_string()
    } else {
        let arms: Vec<String> = edges[1..bins]
            .iter()
            .enumerate()
            .map(|(i, edge)| format!("WHEN {} < {} THEN {}", value_expr, format_number(*edge), i))
            .collect();
        format!("CASE {} ELSE {} END", arms.join(" "), last)
    };
    let not_null = format!("{} IS NOT NULL", value_expr);
    let filters = std::iter::once(not_null).chain(predicate.map(str::to_string));
    let sql = format!(
        "SELECT {index} AS bin_index, COUNT(*) AS bin_count FROM {t}{w} GROUP BY 1 ORDER BY 1",
        index = bin_index,
        t = quote_identifier(table),
        w = where_sql(filters),
    );
    let batch = run_query(engine, &sql).await?;

    let mut counts = vec![0u64; bins];
    for row in 0..batch.num_rows() {
        let Some(index) = i64_value(&batch, "bin_index", row)? else {
            continue;
        };
        let index = index.clamp(0, last as i64) as usize;
        counts[index] += count_value(&batch, "bin_count", row)?;
    }
    Ok(counts)
}

/// Bins between consecutive `edges` carrying `counts`
pub(crate) fn bins_from_edges<K, F>(edges: &[f64], counts: &[u64], to_key: F) -> Result<Vec<Bin<K>>, DataError>
where
    K: BinKey,
    F: Fn(f64) -> Result<K, DataError>,
{
    edges
        .windows(2)
        .zip(counts)
        .map(|(pair, &count)| {
            Ok(Bin {
                start: to_key(pair[0])?,
                end: to_key(pair[1])?,
                count,
            })
        })
        .collect()
}

/// Planner for numeric columns
#[derive(Debug, Clone, Default)]
pub struct NumericBinPlanner {
    settings: BinningSettings,
}

impl NumericBinPlanner {
    pub fn new(settings: BinningSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BinningSettings {
        &self.settings
    }
}

#[async_trait]
impl BinPlanner for NumericBinPlanner {
    type Bin = Bin<f64>;

    fn kind(&self) -> &'static str {
        "numeric"
    }

    async fn plan(
        &self,
        engine: &dyn QueryEngine,
        table: &str,
        column: &str,
        filters: &[Filter],
    ) -> Result<BinSet<Bin<f64>>, DataError> {
        let predicate = combine_predicates(filters, None);
        let value_expr = quote_identifier(column);
        let stats = query_numeric_stats(engine, table, column, &value_expr, predicate.as_deref()).await?;
        let null_count = stats.total.saturating_sub(stats.value_count);

        let (min, max) = match (stats.min, stats.max) {
            (Some(min), Some(max)) if stats.value_count > 0 => (min, max),
            _ => {
                debug!(column, total = stats.total, "no numeric values to bin");
                return Ok(BinSet::empty(null_count, stats.total));
            }
        };

        if stats.value_count <= 1 || min == max {
            return Ok(BinSet {
                bins: vec![Bin { start: min, end: max, count: stats.value_count }],
                null_count,
                total: stats.total,
                min: Some(min),
                max: Some(max),
                interval_unit: None,
                is_single_value: true,
                is_fallback_binning: false,
                is_all_unique: false,
            });
        }

        let bins = bin_count_with(
            self.settings.strategy,
            min,
            max,
            stats.value_count,
            stats.iqr(),
            self.settings.min_bins,
            self.settings.max_bins,
        );
        debug!(column, min, max, iqr = stats.iqr(), bins, "planned numeric bins");

        let edges = equal_width_edges(min, max, bins);
        let counts = query_bin_counts(engine, table, &value_expr, predicate.as_deref(), &edges).await?;
        let bins = bins_from_edges(&edges, &counts, Ok)?;

        Ok(BinSet {
            bins,
            null_count,
            total: stats.total,
            min: Some(min),
            max: Some(max),
            interval_unit: None,
            is_single_value: false,
            is_fallback_binning: false,
            is_all_unique: false,
        })
    }
}
