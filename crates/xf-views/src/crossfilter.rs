//! Crossfilter coordinator
//!
//! Owns the shared filter list for one table and the columns drawn over it.
//! Controllers report filter changes on the event bus; [`Crossfilter::sync`]
//! folds them into the [`FilterStore`] and refetches every column whose
//! effective filter list changed. With `exclude_own_filter` on, a column is
//! computed from every filter except its own, so it keeps showing the values
//! a user could still switch to.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use xf_core::events::events::{BrushCleared, BrushCommitted, FilterCleared, FilterRequested, SelectionChanged};
use xf_core::{CancelStack, EventBus, Filter, FilterStore, QueryEngine, WidgetSettings};
use xf_data::{CategoricalBinPlanner, ColumnKind, DataError, NumericBinPlanner, TemporalBinPlanner};

use crate::column::{error_chain, ColumnHandle, ColumnView, FetchOutcome};
use crate::pointer::PointerEvent;
use crate::selection::{BrushSnapshot, SelectionSnapshot};

#[derive(Debug, Clone)]
enum PendingChange {
    Apply(Filter),
    Clear(String),
}

/// Columns touched by one round of refetches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub applied: Vec<String>,
    pub superseded: Vec<String>,
    /// Column name and error chain
    pub failed: Vec<(String, String)>,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.superseded.is_empty() && self.failed.is_empty()
    }
}

/// Saved interaction state of one column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSession {
    #[serde(default)]
    pub selection: SelectionSnapshot,
    #[serde(default)]
    pub brush: Option<BrushSnapshot>,
}

/// Saved widget state: the filter list plus per-column interaction records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnSession>,
}

pub struct Crossfilter {
    engine: Arc<dyn QueryEngine>,
    table: String,
    settings: WidgetSettings,
    bus: Arc<EventBus>,
    store: FilterStore,
    cancel: CancelStack,
    columns: RwLock<Vec<Arc<dyn ColumnHandle>>>,
    pending: Arc<Mutex<Vec<PendingChange>>>,
    /// Filter each column's own interaction placed in the store
    interactive: Mutex<AHashMap<String, Filter>>,
}

impl Crossfilter {
    pub fn new(engine: Arc<dyn QueryEngine>, table: impl Into<String>, settings: WidgetSettings) -> Self {
        let bus = Arc::new(EventBus::new());
        let pending = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancelStack::new();

        let sink = Arc::clone(&pending);
        bus.subscribe_fn::<FilterRequested, _>(move |e| {
            sink.lock().push(PendingChange::Apply(e.filter.clone()));
        });
        let sink = Arc::clone(&pending);
        bus.subscribe_fn::<FilterCleared, _>(move |e| {
            sink.lock().push(PendingChange::Clear(e.column.clone()));
        });

        let stack = cancel.clone();
        bus.subscribe_fn::<SelectionChanged, _>(move |e| {
            if e.selected {
                stack.push(&e.column);
            } else {
                stack.remove(&e.column);
            }
        });
        let stack = cancel.clone();
        bus.subscribe_fn::<BrushCommitted, _>(move |e| stack.push(&e.column));
        let stack = cancel.clone();
        bus.subscribe_fn::<BrushCleared, _>(move |e| stack.remove(&e.column));

        Self {
            engine,
            table: table.into(),
            settings,
            bus,
            store: FilterStore::new(),
            cancel,
            columns: RwLock::new(Vec::new()),
            pending,
            interactive: Mutex::new(AHashMap::new()),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn settings(&self) -> &WidgetSettings {
        &self.settings
    }

    /// Bus carrying every column's notifications
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &FilterStore {
        &self.store
    }

    /// Register a column with the planner for its kind
    ///
    /// The column stays unavailable until the next refresh.
    pub fn add_column(&self, name: &str, kind: ColumnKind) -> Arc<dyn ColumnHandle> {
        if let Some(existing) = self.column(name) {
            return existing;
        }
        let binning = self.settings.binning.clone();
        let interaction = self.settings.interaction.clone();
        let bus = Arc::clone(&self.bus);
        let handle: Arc<dyn ColumnHandle> = match kind {
            ColumnKind::Numeric => Arc::new(ColumnView::new(name, kind, NumericBinPlanner::new(binning), interaction, bus)),
            ColumnKind::Temporal => {
                Arc::new(ColumnView::new(name, kind, TemporalBinPlanner::new(binning), interaction, bus))
            }
            ColumnKind::Categorical => {
                Arc::new(ColumnView::new(name, kind, CategoricalBinPlanner::new(binning), interaction, bus))
            }
        };
        debug!(column = name, %kind, "registered column");
        self.columns.write().push(Arc::clone(&handle));
        handle
    }

    pub fn column(&self, name: &str) -> Option<Arc<dyn ColumnHandle>> {
        self.columns.read().iter().find(|c| c.column() == name).cloned()
    }

    pub fn columns(&self) -> Vec<Arc<dyn ColumnHandle>> {
        self.columns.read().clone()
    }

    /// Filters a column is computed under
    pub fn filters_for(&self, column: &str) -> Vec<Filter> {
        if self.settings.crossfilter.exclude_own_filter {
            self.store.filters_excluding(column)
        } else {
            self.store.filters()
        }
    }

    /// Column that Escape would cancel next
    pub fn cancel_target(&self) -> Option<String> {
        self.cancel.peek()
    }

    /// Refetch every column
    pub async fn refresh_all(&self) -> Result<RefreshReport, DataError> {
        let targets = self.columns();
        self.refresh_columns(targets).await
    }

    /// Route a pointer event to a column, then apply what it requested
    pub async fn pointer(&self, column: &str, event: PointerEvent) -> Result<RefreshReport, DataError> {
        match self.column(column) {
            Some(handle) => handle.pointer(event),
            None => {
                warn!(column, "pointer event for unknown column");
                return Ok(RefreshReport::default());
            }
        }
        self.sync().await
    }

    /// Fold queued filter changes into the store and refetch affected columns
    pub async fn sync(&self) -> Result<RefreshReport, DataError> {
        let touched = self.drain_pending();
        self.refresh_touched(&touched).await
    }

    /// Cancel the most recently activated selection or brush
    ///
    /// Returns the cancelled column, or `None` when nothing was active.
    pub async fn cancel_latest(&self) -> Result<Option<String>, DataError> {
        let Some(column) = self.cancel.pop() else {
            return Ok(None);
        };
        let cleared = match self.column(&column) {
            Some(handle) => handle.controller().lock().cancel(),
            None => false,
        };
        if !cleared {
            // Controller was reset by a refetch; its filter is still in the store
            self.pending.lock().push(PendingChange::Clear(column.clone()));
        }
        info!(column = %column, "cancelled selection");
        self.sync().await?;
        Ok(Some(column))
    }

    /// Add a filter that no column interaction owns
    pub async fn apply_filter(&self, filter: Filter) -> Result<RefreshReport, DataError> {
        let mut touched = self.drain_pending();
        touched.push(filter.column.clone());
        self.store.apply(filter);
        self.refresh_touched(&touched).await
    }

    /// Drop every filter on `column`, interactive or not
    pub async fn clear_column(&self, column: &str) -> Result<RefreshReport, DataError> {
        if let Some(handle) = self.column(column) {
            handle.controller().lock().cancel();
        }
        let mut touched = self.drain_pending();
        self.interactive.lock().remove(column);
        self.cancel.remove(column);
        if self.store.remove_column(column) {
            touched.push(column.to_string());
        }
        self.refresh_touched(&touched).await
    }

    /// Drop every filter and selection
    pub async fn clear_all(&self) -> Result<RefreshReport, DataError> {
        for handle in self.columns() {
            handle.controller().lock().cancel();
        }
        self.pending.lock().clear();
        self.interactive.lock().clear();
        while self.cancel.pop().is_some() {}
        self.store.clear();
        self.refresh_all().await
    }

    /// Capture the filter list and each column's interaction state
    pub fn session(&self) -> Session {
        let columns = self
            .columns()
            .iter()
            .map(|handle| {
                let controller = handle.controller().lock();
                let record = ColumnSession {
                    selection: controller.selection_state(),
                    brush: controller.brush_state(),
                };
                (handle.column().to_string(), record)
            })
            .filter(|(_, record)| *record != ColumnSession::default())
            .collect();
        Session {
            filters: self.store.filters(),
            columns,
        }
    }

    /// Restore a saved session
    ///
    /// The filter list is installed first and every column refetched; the
    /// interaction records are then applied against the new bins. Records
    /// that no longer fit a column's bins are dropped.
    pub async fn restore(&self, session: &Session) -> Result<RefreshReport, DataError> {
        for handle in self.columns() {
            handle.controller().lock().cancel();
        }
        self.pending.lock().clear();
        self.interactive.lock().clear();
        while self.cancel.pop().is_some() {}
        self.store.clear();
        for filter in &session.filters {
            self.store.apply(filter.clone());
        }

        let report = self.refresh_all().await?;

        for (name, record) in &session.columns {
            let Some(handle) = self.column(name) else {
                debug!(column = %name, "saved state for unknown column");
                continue;
            };
            let expected = {
                let mut controller = handle.controller().lock();
                let restored = match &record.brush {
                    Some(brush) => controller.set_brush_state(brush),
                    None => controller.set_selection_state(&record.selection),
                };
                if restored { controller.active_filter() } else { None }
            };
            // The interaction owns only the saved filter of its own kind
            let owned = expected.and_then(|expected| session.filters.iter().find(|f| f.same_slot(&expected)));
            match owned {
                Some(filter) => {
                    self.interactive.lock().insert(name.clone(), filter.clone());
                }
                None => debug!(column = %name, "restored interaction has no saved filter"),
            }
        }
        // Restoring emits no filter requests; anything queued is a reset echo
        self.pending.lock().clear();
        Ok(report)
    }

    /// Apply queued changes to the store; returns the columns whose filters changed
    fn drain_pending(&self) -> Vec<String> {
        let changes = std::mem::take(&mut *self.pending.lock());
        let mut touched = Vec::new();
        let mut interactive = self.interactive.lock();
        for change in changes {
            match change {
                PendingChange::Apply(filter) => {
                    let column = filter.column.clone();
                    if let Some(previous) = interactive.get(&column) {
                        if !previous.same_slot(&filter) {
                            self.store.remove_slot(previous);
                        }
                    }
                    debug!(column = %column, ?filter, "applying filter");
                    self.store.apply(filter.clone());
                    interactive.insert(column.clone(), filter);
                    touched.push(column);
                }
                PendingChange::Clear(column) => {
                    if let Some(previous) = interactive.remove(&column) {
                        debug!(column = %column, "clearing filter");
                        self.store.remove_slot(&previous);
                        touched.push(column);
                    }
                }
            }
        }
        touched
    }

    async fn refresh_touched(&self, touched: &[String]) -> Result<RefreshReport, DataError> {
        if touched.is_empty() {
            return Ok(RefreshReport::default());
        }
        let exclude = self.settings.crossfilter.exclude_own_filter;
        let targets: Vec<_> = self
            .columns()
            .into_iter()
            .filter(|c| !exclude || touched.iter().any(|t| t != c.column()))
            .collect();
        self.refresh_columns(targets).await
    }

    async fn refresh_columns(&self, targets: Vec<Arc<dyn ColumnHandle>>) -> Result<RefreshReport, DataError> {
        let mut tasks = JoinSet::new();
        for (order, handle) in targets.into_iter().enumerate() {
            let engine = Arc::clone(&self.engine);
            let table = self.table.clone();
            let filters = self.filters_for(handle.column());
            tasks.spawn(async move {
                let outcome = handle.refresh(engine.as_ref(), &table, &filters).await;
                (order, handle.column().to_string(), outcome)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            results.push(joined?);
        }
        results.sort_by_key(|(order, _, _)| *order);

        let mut report = RefreshReport::default();
        for (_, column, outcome) in results {
            match outcome {
                Ok(FetchOutcome::Applied { .. }) => report.applied.push(column),
                Ok(FetchOutcome::Superseded) => report.superseded.push(column),
                Err(e) => {
                    let message = error_chain(&e);
                    report.failed.push((column, message));
                }
            }
        }
        info!(
            table = %self.table,
            applied = report.applied.len(),
            failed = report.failed.len(),
            "refreshed columns"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xf_core::CrossfilterSettings;
    use xf_data::SqliteEngine;

    use crate::selection::InteractionState;

    fn engine() -> Arc<dyn QueryEngine> {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .execute_batch(
                "CREATE TABLE sales (price REAL, region TEXT, sold_at TEXT);
                 INSERT INTO sales VALUES
                   (10, 'north', '2024-01-01T08:00:00Z'),
                   (20, 'north', '2024-01-01T09:00:00Z'),
                   (30, 'north', '2024-01-01T10:00:00Z'),
                   (40, 'south', '2024-01-01T11:00:00Z'),
                   (50, 'south', '2024-01-01T12:00:00Z'),
                   (60, 'east',  '2024-01-01T13:00:00Z'),
                   (70, NULL,    '2024-01-01T14:00:00Z');",
            )
            .unwrap();
        Arc::new(engine)
    }

    async fn widget(settings: WidgetSettings) -> Crossfilter {
        let cf = Crossfilter::new(engine(), "sales", settings);
        cf.add_column("price", ColumnKind::Numeric);
        cf.add_column("region", ColumnKind::Categorical);
        cf.add_column("sold_at", ColumnKind::Temporal);
        let report = cf.refresh_all().await.unwrap();
        assert_eq!(report.applied, vec!["price", "region", "sold_at"]);
        cf
    }

    fn total(cf: &Crossfilter, column: &str) -> u64 {
        let bins = cf.column(column).unwrap().bins().unwrap();
        (0..bins.len()).filter_map(|i| bins.count_at(i)).sum()
    }

    fn bin_center(cf: &Crossfilter, column: &str, index: usize) -> f32 {
        let handle = cf.column(column).unwrap();
        let extent = handle.controller().lock().layout().extent(index).unwrap();
        (extent.start + extent.end) / 2.0
    }

    async fn click(cf: &Crossfilter, column: &str, index: usize, time_ms: u64) -> RefreshReport {
        let x = bin_center(cf, column, index);
        cf.pointer(column, PointerEvent::Move { x, y: 0.0 }).await.unwrap();
        cf.pointer(column, PointerEvent::Down { x, y: 0.0, time_ms }).await.unwrap();
        cf.pointer(column, PointerEvent::Up { x, y: 0.0, time_ms: time_ms + 50 }).await.unwrap()
    }

    #[tokio::test]
    async fn test_click_filters_other_columns_only() {
        let cf = widget(WidgetSettings::default()).await;
        assert_eq!(total(&cf, "price"), 7);

        // Categories sort by count, so bin 0 is "north"
        let report = click(&cf, "region", 0, 1_000).await;
        assert_eq!(report.applied, vec!["price", "sold_at"]);
        assert_eq!(cf.store().filters(), vec![Filter::point("region", "north")]);

        assert_eq!(total(&cf, "price"), 3);
        assert_eq!(total(&cf, "sold_at"), 3);
        // The clicked column keeps its full distribution
        assert_eq!(total(&cf, "region"), 6);
        assert!(matches!(
            cf.column("region").unwrap().controller().lock().state(),
            InteractionState::Selected { .. }
        ));
        assert_eq!(cf.cancel_target().as_deref(), Some("region"));
    }

    #[tokio::test]
    async fn test_escape_clears_latest_first() {
        let cf = widget(WidgetSettings::default()).await;
        click(&cf, "region", 0, 1_000).await;

        let price = cf.column("price").unwrap();
        let (a, b) = {
            let controller = price.controller().lock();
            let layout = controller.layout();
            (layout.extent(0).unwrap().start + 1.0, layout.extent(1).unwrap().end - 1.0)
        };
        cf.pointer("price", PointerEvent::Down { x: a, y: 0.0, time_ms: 5_000 }).await.unwrap();
        cf.pointer("price", PointerEvent::Move { x: b, y: 0.0 }).await.unwrap();
        cf.pointer("price", PointerEvent::Up { x: b, y: 0.0, time_ms: 5_100 }).await.unwrap();
        assert_eq!(cf.store().filters().len(), 2);
        assert_eq!(cf.cancel_target().as_deref(), Some("price"));

        assert_eq!(cf.cancel_latest().await.unwrap().as_deref(), Some("price"));
        assert_eq!(cf.store().filters(), vec![Filter::point("region", "north")]);
        assert_eq!(price.controller().lock().state(), &InteractionState::Idle);

        // The region selection was reset by refetches but its filter still clears
        assert_eq!(cf.cancel_latest().await.unwrap().as_deref(), Some("region"));
        assert!(cf.store().filters().is_empty());
        assert_eq!(total(&cf, "price"), 7);

        assert_eq!(cf.cancel_latest().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reselect_replaces_filter_kind() {
        let cf = widget(WidgetSettings::default()).await;
        click(&cf, "region", 0, 1_000).await;
        // Second click deselects
        click(&cf, "region", 0, 3_000).await;
        assert!(cf.store().filters().is_empty());
        assert_eq!(total(&cf, "price"), 7);

        cf.apply_filter(Filter::not_null("region")).await.unwrap();
        assert_eq!(total(&cf, "price"), 6);
        click(&cf, "region", 1, 5_000).await;
        assert_eq!(
            cf.store().filters(),
            vec![Filter::not_null("region"), Filter::point("region", "south")]
        );

        cf.clear_column("region").await.unwrap();
        assert!(cf.store().filters().is_empty());
        assert_eq!(cf.cancel_target(), None);
    }

    #[tokio::test]
    async fn test_without_exclusion_every_column_refreshes() {
        let settings = WidgetSettings {
            crossfilter: CrossfilterSettings { exclude_own_filter: false },
            ..WidgetSettings::default()
        };
        let cf = widget(settings).await;
        let report = click(&cf, "region", 0, 1_000).await;
        assert_eq!(report.applied, vec!["price", "region", "sold_at"]);
        assert_eq!(total(&cf, "region"), 3);
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let cf = widget(WidgetSettings::default()).await;
        click(&cf, "region", 1, 1_000).await;
        let session = cf.session();
        assert_eq!(session.filters, vec![Filter::point("region", "south")]);
        assert_eq!(session.columns["region"].selection.selected_index, Some(1));

        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();

        let other = widget(WidgetSettings::default()).await;
        other.restore(&restored).await.unwrap();
        assert_eq!(other.store().filters(), vec![Filter::point("region", "south")]);
        assert_eq!(total(&other, "price"), 2);
        assert_eq!(other.session(), session);

        assert_eq!(other.cancel_latest().await.unwrap().as_deref(), Some("region"));
        assert!(other.store().filters().is_empty());
    }

    #[tokio::test]
    async fn test_restore_keeps_applied_filter_beside_selection() {
        let cf = widget(WidgetSettings::default()).await;
        cf.apply_filter(Filter::not_null("region")).await.unwrap();
        click(&cf, "region", 1, 1_000).await;
        let session = cf.session();
        assert_eq!(
            session.filters,
            vec![Filter::not_null("region"), Filter::point("region", "south")]
        );

        let other = widget(WidgetSettings::default()).await;
        other.restore(&session).await.unwrap();
        assert_eq!(other.store().filters(), session.filters);

        // Escape drops the click's filter, not the one applied beside it
        assert_eq!(other.cancel_latest().await.unwrap().as_deref(), Some("region"));
        assert_eq!(other.store().filters(), vec![Filter::not_null("region")]);
        assert_eq!(total(&other, "price"), 6);
    }
}
