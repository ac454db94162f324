//! Calendar-aware bins for temporal columns
//!
//! The planner picks a calendar unit from the elapsed range, coarsens it
//! until the bucket count fits the cap, and groups rows by `date_trunc`.
//! When even yearly buckets overflow the cap it bins the epoch-millisecond
//! values with the numeric equal-width strategy instead.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};
use xf_core::filter::predicate::{combine_predicates, quote_identifier, quote_string};
use xf_core::{BinningSettings, Filter, QueryEngine};

use super::calendar::{adjust_for_cap, detect_interval, needs_fallback, TimeUnit};
use super::numeric::{bin_count_with, bins_from_edges, equal_width_edges, query_bin_counts, query_numeric_stats};
use super::{run_query, where_sql, Bin, BinPlanner, BinSet};
use crate::batch::{count_value, instant_value};
use crate::DataError;

/// Instant for an epoch-millisecond value
pub fn instant_from_ms(ms: f64) -> Result<DateTime<Utc>, DataError> {
    if !ms.is_finite() {
        return Err(DataError::OutOfRange(format!("epoch milliseconds {}", ms)));
    }
    Utc.timestamp_millis_opt(ms.round() as i64)
        .single()
        .ok_or_else(|| DataError::OutOfRange(format!("epoch milliseconds {}", ms)))
}

/// Planner for temporal columns
#[derive(Debug, Clone, Default)]
pub struct TemporalBinPlanner {
    settings: BinningSettings,
}

impl TemporalBinPlanner {
    pub fn new(settings: BinningSettings) -> Self {
        Self { settings }
    }

    /// Calendar unit the planner would use for `[min, max]`, or `None`
    /// when it falls back to equal-width bins
    pub fn choose_unit(&self, min: DateTime<Utc>, max: DateTime<Utc>) -> Option<TimeUnit> {
        let cap = self.settings.temporal_max_bins;
        if needs_fallback(min, max, cap) {
            return None;
        }
        Some(adjust_for_cap(min, max, detect_interval(min, max), cap))
    }

    async fn calendar_bins(
        &self,
        engine: &dyn QueryEngine,
        table: &str,
        column: &str,
        predicate: Option<&str>,
        unit: TimeUnit,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Result<Vec<Bin<DateTime<Utc>>>, DataError> {
        let col = quote_identifier(column);
        let parseable = format!("epoch_ms({}) IS NOT NULL", col);
        let sql = format!(
            "SELECT date_trunc({unit}, {col}) AS bucket, COUNT(*) AS bin_count FROM {t}{w} GROUP BY 1 ORDER BY 1",
            unit = quote_string(unit.as_sql()),
            col = col,
            t = quote_identifier(table),
            w = where_sql(std::iter::once(parseable).chain(predicate.map(str::to_string))),
        );
        let batch = run_query(engine, &sql).await?;

        let mut counts: BTreeMap<DateTime<Utc>, u64> = BTreeMap::new();
        for row in 0..batch.num_rows() {
            match instant_value(&batch, "bucket", row)? {
                Some(bucket) => {
                    *counts.entry(unit.truncate(bucket)).or_default() += count_value(&batch, "bin_count", row)?;
                }
                None => warn!(column, row, "skipping unparseable bucket"),
            }
        }

        let mut bins = Vec::with_capacity(unit.buckets_between(min, max) as usize);
        let last = unit.truncate(max);
        let mut start = unit.truncate(min);
        while start <= last {
            let end = unit
                .add_one(start)
                .ok_or_else(|| DataError::OutOfRange(format!("{} after {}", unit, start)))?;
            let count = counts.remove(&start).unwrap_or(0);
            bins.push(Bin { start, end, count });
            start = end;
        }
        if !counts.is_empty() {
            warn!(column, stray = counts.len(), "buckets outside the planned range were dropped");
        }
        Ok(bins)
    }
}

#[async_trait]
impl BinPlanner for TemporalBinPlanner {
    type Bin = Bin<DateTime<Utc>>;

    fn kind(&self) -> &'static str {
        "temporal"
    }

    async fn plan(
        &self,
        engine: &dyn QueryEngine,
        table: &str,
        column: &str,
        filters: &[Filter],
    ) -> Result<BinSet<Bin<DateTime<Utc>>>, DataError> {
        let predicate = combine_predicates(filters, None);
        let value_expr = format!("epoch_ms({})", quote_identifier(column));
        let stats = query_numeric_stats(engine, table, column, &value_expr, predicate.as_deref()).await?;
        let null_count = stats.null_count();

        let unparseable = stats.non_null_count.saturating_sub(stats.value_count);
        if unparseable > 0 {
            warn!(column, unparseable, parsed = stats.value_count, "skipping unparseable temporal values");
        }
        if stats.value_count == 0 || unparseable > stats.value_count {
            debug!(column, total = stats.total, "no usable temporal values to bin");
            return Ok(BinSet::empty(null_count, stats.total));
        }

        let (min_ms, max_ms) = match (stats.min, stats.max) {
            (Some(min), Some(max)) => (min, max),
            _ => return Ok(BinSet::empty(null_count, stats.total)),
        };
        let min = instant_from_ms(min_ms)?;
        let max = instant_from_ms(max_ms)?;

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

        let (bins, interval_unit) = match self.choose_unit(min, max) {
            Some(unit) => {
                debug!(column, %unit, %min, %max, "planned calendar bins");
                let bins = self
                    .calendar_bins(engine, table, column, predicate.as_deref(), unit, min, max)
                    .await?;
                (bins, Some(unit))
            }
            None => {
                let count = bin_count_with(
                    self.settings.strategy,
                    min_ms,
                    max_ms,
                    stats.value_count,
                    stats.iqr(),
                    self.settings.min_bins,
                    self.settings.temporal_max_bins,
                );
                debug!(column, bins = count, %min, %max, "calendar units overflow, using equal-width bins");
                // whole milliseconds, matching the instants the bin filters carry
                let edges: Vec<f64> = equal_width_edges(min_ms, max_ms, count)
                    .into_iter()
                    .map(f64::round)
                    .collect();
                let counts = query_bin_counts(engine, table, &value_expr, predicate.as_deref(), &edges).await?;
                (bins_from_edges(&edges, &counts, instant_from_ms)?, None)
            }
        };

        Ok(BinSet {
            bins,
            null_count,
            total: stats.total,
            min: Some(min),
            max: Some(max),
            is_fallback_binning: interval_unit.is_none(),
            interval_unit,
            is_single_value: false,
            is_all_unique: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bins::fixtures::{engine_with, instants_table};
    use crate::bins::SelectableBins;

    fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_hourly_range_coarsens_to_days() {
        let engine = instants_table(&[
            Some("2024-03-01T00:00:00Z"),
            Some("2024-03-02T06:00:00Z"),
            Some("2024-03-02T18:00:00Z"),
            Some("2024-03-04T00:00:00Z"),
        ]);
        let set = TemporalBinPlanner::default().fetch(&engine, "e", "ts", &[]).await.unwrap();

        assert_eq!(set.interval_unit, Some(TimeUnit::Day));
        assert!(!set.is_fallback_binning);
        let counts: Vec<u64> = set.bins.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 2, 0, 1]);
        assert_eq!(set.bins[0].start, at(2024, 3, 1, 0));
        assert_eq!(set.bins[3].end, at(2024, 3, 5, 0));
        assert_eq!(set.label_at(1).as_deref(), Some("Mar 2"));
    }

    #[tokio::test]
    async fn test_month_bins_use_calendar_lengths() {
        let engine = instants_table(&[
            Some("2023-01-15T00:00:00Z"),
            Some("2023-02-20T00:00:00Z"),
            Some("2023-12-31T23:00:00Z"),
            Some("2024-01-02T00:00:00Z"),
            Some("2024-02-10T00:00:00Z"),
        ]);
        let set = TemporalBinPlanner::default().fetch(&engine, "e", "ts", &[]).await.unwrap();

        assert_eq!(set.interval_unit, Some(TimeUnit::Month));
        assert_eq!(set.len(), 14);
        assert_eq!(set.bins[1].start, at(2023, 2, 1, 0));
        assert_eq!(set.bins[1].end, at(2023, 3, 1, 0));
        assert_eq!(set.binned_count(), 5);
        assert_eq!(set.label_at(0).as_deref(), Some("Jan 2023"));
        for pair in set.bins.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[tokio::test]
    async fn test_multi_decade_data_falls_back() {
        let mut sql = String::from("CREATE TABLE e (ts TEXT);");
        for year in (1900..2024).step_by(3) {
            sql.push_str(&format!("INSERT INTO e VALUES ('{}-06-01T00:00:00Z');", year));
        }
        let engine = engine_with(&sql);
        let set = TemporalBinPlanner::default().fetch(&engine, "e", "ts", &[]).await.unwrap();

        assert!(set.is_fallback_binning);
        assert_eq!(set.interval_unit, None);
        assert!(set.len() >= 5 && set.len() <= 20);
        assert_eq!(set.binned_count(), 42);
        assert_eq!(set.bins.first().unwrap().start, at(1900, 6, 1, 0));
        assert_eq!(set.bins.last().unwrap().end, at(2023, 6, 1, 0));
        assert_eq!(set.label_at(0).unwrap().len(), "1900-06-01 00:00:00 to 1906-03-02 00:00:00".len());
    }

    #[tokio::test]
    async fn test_unparseable_and_null_values_are_skipped() {
        let engine = instants_table(&[
            Some("2024-01-01T00:00:00Z"),
            Some("garbage"),
            None,
            Some("2024-01-01T00:00:30Z"),
            Some("2024-01-01T00:00:45Z"),
        ]);
        let set = TemporalBinPlanner::default().fetch(&engine, "e", "ts", &[]).await.unwrap();

        assert_eq!(set.total, 5);
        assert_eq!(set.null_count, 1);
        assert_eq!(set.binned_count(), 3);
        assert_eq!(set.interval_unit, Some(TimeUnit::Minute));
    }

    #[tokio::test]
    async fn test_garbage_dominated_column_is_empty() {
        let engine = instants_table(&[Some("2024-01-01T00:00:00Z"), Some("x"), Some("y")]);
        let set = TemporalBinPlanner::default().fetch(&engine, "e", "ts", &[]).await.unwrap();
        assert!(set.is_empty());
        assert_eq!(set.total, 3);
    }

    #[tokio::test]
    async fn test_single_instant() {
        let engine = instants_table(&[Some("2024-05-05T05:05:05Z"), Some("2024-05-05T05:05:05Z"), None]);
        let set = TemporalBinPlanner::default().fetch(&engine, "e", "ts", &[]).await.unwrap();
        assert!(set.is_single_value);
        assert_eq!(set.bins.len(), 1);
        assert_eq!(set.bins[0].count, 2);
        assert_eq!(set.null_count, 1);
        assert_eq!(
            set.filter_for_bin("ts", 0),
            Some(Filter::point("ts", Utc.with_ymd_and_hms(2024, 5, 5, 5, 5, 5).unwrap()))
        );
    }

    /// Refetch under each bin's filter and compare totals with the bin counts
    async fn assert_bins_select_their_rows(engine: &crate::SqliteEngine, table: &str, column: &str) {
        let planner = TemporalBinPlanner::default();
        let set = planner.fetch(engine, table, column, &[]).await.unwrap();
        assert!(!set.is_empty());
        for index in 0..set.len() {
            let filter = set.filter_for_bin(column, index).unwrap();
            let narrowed = planner.fetch(engine, table, column, &[filter]).await.unwrap();
            assert_eq!(narrowed.total, set.bins[index].count, "{column} bin {index}");
        }
        let brush = set.filter_for_range(column, 0, set.len() - 1).unwrap();
        let everything = planner.fetch(engine, table, column, &[brush]).await.unwrap();
        assert_eq!(everything.total, set.binned_count());
    }

    #[tokio::test]
    async fn test_date_only_bins_select_their_rows() {
        let engine = engine_with(
            "CREATE TABLE d (day DATE);
             INSERT INTO d VALUES ('2024-03-01'), ('2024-03-02'), ('2024-03-03'), ('2024-03-05');",
        );
        let set = TemporalBinPlanner::default().fetch(&engine, "d", "day", &[]).await.unwrap();
        let counts: Vec<u64> = set.bins.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 1, 0, 1]);

        let second_day = set.filter_for_bin("day", 1).unwrap();
        let narrowed = TemporalBinPlanner::default()
            .fetch(&engine, "d", "day", &[second_day])
            .await
            .unwrap();
        assert_eq!(narrowed.total, 1);
        assert_eq!(narrowed.min, Some(at(2024, 3, 2, 0)));

        assert_bins_select_their_rows(&engine, "d", "day").await;
    }

    #[tokio::test]
    async fn test_naive_text_bins_select_their_rows() {
        let engine = engine_with(
            "CREATE TABLE n (spaced TEXT, tee TEXT, us TEXT);
             INSERT INTO n VALUES ('2024-03-01 08:00:00', '2024-03-01T08:00:00', '03/01/2024 08:00:00 AM');
             INSERT INTO n VALUES ('2024-03-01 23:59:59', '2024-03-01T23:59:59', '03/01/2024 11:59:59 PM');
             INSERT INTO n VALUES ('2024-03-02 00:00:00', '2024-03-02T00:00:00', '03/02/2024 12:00:00 AM');
             INSERT INTO n VALUES ('2024-03-04 12:30:00', '2024-03-04T12:30:00', '03/04/2024 12:30:00 PM');",
        );
        for column in ["spaced", "tee", "us"] {
            let set = TemporalBinPlanner::default().fetch(&engine, "n", column, &[]).await.unwrap();
            assert_eq!(set.binned_count(), 4, "{column}");
            assert_bins_select_their_rows(&engine, "n", column).await;
        }
    }

    #[tokio::test]
    async fn test_fallback_bins_select_their_rows() {
        let mut sql = String::from("CREATE TABLE e (ts TEXT);");
        for year in (1900..2024).step_by(7) {
            sql.push_str(&format!("INSERT INTO e VALUES ('{}-02-17 13:45:10.123');", year));
        }
        let engine = engine_with(&sql);
        let set = TemporalBinPlanner::default().fetch(&engine, "e", "ts", &[]).await.unwrap();
        assert!(set.is_fallback_binning);
        assert_bins_select_their_rows(&engine, "e", "ts").await;
    }

    #[test]
    fn test_choose_unit_respects_cap() {
        let planner = TemporalBinPlanner::new(BinningSettings {
            temporal_max_bins: 5,
            ..BinningSettings::default()
        });
        assert_eq!(planner.choose_unit(at(2024, 1, 1, 0), at(2024, 1, 20, 0)), Some(TimeUnit::Week));
        assert_eq!(planner.choose_unit(at(2000, 1, 1, 0), at(2024, 1, 1, 0)), None);
    }
}
