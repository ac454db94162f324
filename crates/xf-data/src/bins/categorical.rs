//! Frequency-ranked bins for categorical columns

use async_trait::async_trait;
use tracing::debug;
use xf_core::filter::predicate::{combine_predicates, quote_identifier};
use xf_core::{BinningSettings, Filter, QueryEngine};

use super::{require_row, run_query, where_sql, BinPlanner, BinSet, CategoryBin};
use crate::batch::{count_value, string_value};
use crate::DataError;

/// Planner for categorical columns
///
/// Keeps the `max_categories` most frequent values (count descending, value
/// ascending) and folds the rest into one trailing "other" bin.
#[derive(Debug, Clone, Default)]
pub struct CategoricalBinPlanner {
    settings: BinningSettings,
}

impl CategoricalBinPlanner {
    pub fn new(settings: BinningSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BinPlanner for CategoricalBinPlanner {
    type Bin = CategoryBin;

    fn kind(&self) -> &'static str {
        "categorical"
    }

    async fn plan(
        &self,
        engine: &dyn QueryEngine,
        table: &str,
        column: &str,
        filters: &[Filter],
    ) -> Result<BinSet<CategoryBin>, DataError> {
        let predicate = combine_predicates(filters, None);
        let col = quote_identifier(column);
        let from = quote_identifier(table);

        let stats_sql = format!(
            "SELECT COUNT(*) AS total_count, COUNT({c}) AS non_null_count, \
             COUNT(DISTINCT {c}) AS distinct_count FROM {t}{w}",
            c = col,
            t = from,
            w = where_sql(predicate.clone()),
        );
        let stats = run_query(engine, &stats_sql).await?;
        require_row(&stats, "categorical stats")?;
        let total = count_value(&stats, "total_count", 0)?;
        let non_null = count_value(&stats, "non_null_count", 0)?;
        let distinct = count_value(&stats, "distinct_count", 0)?;
        let null_count = total.saturating_sub(non_null);

        if non_null == 0 {
            debug!(column, total, "no categorical values to bin");
            return Ok(BinSet::empty(null_count, total));
        }

        let limit = self.settings.max_categories.max(1);
        let not_null = format!("{} IS NOT NULL", col);
        let top_sql = format!(
            "SELECT {c} AS value, COUNT(*) AS value_count FROM {t}{w} \
             GROUP BY 1 ORDER BY 2 DESC, 1 ASC LIMIT {limit}",
            c = col,
            t = from,
            w = where_sql(std::iter::once(not_null).chain(predicate)),
            limit = limit,
        );
        let top = run_query(engine, &top_sql).await?;

        let mut bins = Vec::with_capacity(top.num_rows() + 1);
        for row in 0..top.num_rows() {
            let Some(value) = string_value(&top, "value", row)? else {
                continue;
            };
            bins.push(CategoryBin {
                value,
                count: count_value(&top, "value_count", row)?,
                is_other: false,
                other_distinct_count: None,
            });
        }

        if distinct > limit as u64 {
            let shown: u64 = bins.iter().map(|b| b.count).sum();
            bins.push(CategoryBin {
                value: String::new(),
                count: non_null.saturating_sub(shown),
                is_other: true,
                other_distinct_count: Some(distinct - limit as u64),
            });
        }
        debug!(column, distinct, shown = bins.len(), "planned categorical bins");

        Ok(BinSet {
            bins,
            null_count,
            total,
            min: None,
            max: None,
            interval_unit: None,
            is_single_value: distinct == 1,
            is_fallback_binning: false,
            is_all_unique: distinct == non_null && non_null > 1,
        })
    }
}
