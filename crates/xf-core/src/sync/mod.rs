use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::filter::Filter;
use crate::filter::predicate::{combine_predicates, to_where_clause};

/// Active filter list shared by every column of a widget
#[derive(Clone, Default)]
pub struct FilterStore {
    inner: Arc<RwLock<FilterList>>,
}

#[derive(Default)]
struct FilterList {
    filters: Vec<Filter>,
    revision: u64,
}

impl FilterStore {
    /// Create an empty filter store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the active filters
    pub fn filters(&self) -> Vec<Filter> {
        self.inner.read().filters.clone()
    }

    /// Active filters minus those on `column`
    pub fn filters_excluding(&self, column: &str) -> Vec<Filter> {
        self.inner
            .read()
            .filters
            .iter()
            .filter(|f| f.column != column)
            .cloned()
            .collect()
    }

    /// Merge a filter, replacing any prior filter of the same column and kind
    pub fn apply(&self, filter: Filter) {
        let mut list = self.inner.write();
        match list.filters.iter().position(|f| f.same_slot(&filter)) {
            Some(idx) => list.filters[idx] = filter,
            None => list.filters.push(filter),
        }
        list.revision += 1;
        debug!(revision = list.revision, active = list.filters.len(), "filter list updated");
    }

    /// Drop every filter on `column`; returns whether anything was removed
    pub fn remove_column(&self, column: &str) -> bool {
        let mut list = self.inner.write();
        let before = list.filters.len();
        list.filters.retain(|f| f.column != column);
        let removed = list.filters.len() != before;
        if removed {
            list.revision += 1;
            debug!(column, revision = list.revision, "removed column filters");
        }
        removed
    }

    /// Drop the filter occupying `filter`'s column and kind
    pub fn remove_slot(&self, filter: &Filter) -> bool {
        let mut list = self.inner.write();
        match list.filters.iter().position(|f| f.same_slot(filter)) {
            Some(idx) => {
                list.filters.remove(idx);
                list.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Remove all filters
    pub fn clear(&self) {
        let mut list = self.inner.write();
        if !list.filters.is_empty() {
            list.filters.clear();
            list.revision += 1;
        }
    }

    /// Monotonic counter bumped on every change
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Combined predicate, optionally excluding one column
    pub fn predicate(&self, exclude_column: Option<&str>) -> Option<String> {
        combine_predicates(&self.inner.read().filters, exclude_column)
    }

    /// `WHERE` clause, optionally excluding one column
    pub fn where_clause(&self, exclude_column: Option<&str>) -> String {
        to_where_clause(&self.inner.read().filters, exclude_column)
    }
}

/// Last-in-first-out order of columns holding a cancellable selection
///
/// An escape key press cancels only the most recently activated column.
#[derive(Clone, Default)]
pub struct CancelStack {
    columns: Arc<Mutex<Vec<String>>>,
}

impl CancelStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `column` as the most recent holder
    pub fn push(&self, column: &str) {
        let mut columns = self.columns.lock();
        columns.retain(|c| c != column);
        columns.push(column.to_string());
    }

    /// Forget `column` wherever it sits
    pub fn remove(&self, column: &str) {
        self.columns.lock().retain(|c| c != column);
    }

    /// Take the most recent holder
    pub fn pop(&self) -> Option<String> {
        self.columns.lock().pop()
    }

    pub fn peek(&self) -> Option<String> {
        self.columns.lock().last().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.lock().is_empty()
    }
}
