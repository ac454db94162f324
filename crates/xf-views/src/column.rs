//! A column visualization: planner, current bins and interaction state

use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use xf_core::events::events::{BinsFetched, FetchFailed};
use xf_core::{EventBus, Filter, InteractionSettings, QueryEngine};
use xf_data::{BinPlanner, BinSet, ColumnKind, DataError, SelectableBins};

use crate::layout::{BinLayout, LayoutMode, TrackGeometry};
use crate::pointer::PointerEvent;
use crate::selection::SelectionController;

/// Result of one refresh that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The new bins were installed
    Applied { bins: usize },
    /// A newer refresh started before this one finished; its result was dropped
    Superseded,
}

/// Type-erased column, as held by the crossfilter coordinator
#[async_trait]
pub trait ColumnHandle: Send + Sync {
    fn column(&self) -> &str;

    fn kind(&self) -> ColumnKind;

    /// Refetch bins under `filters`
    ///
    /// Interaction is disabled from the start of the call until new bins
    /// land. A refresh overtaken by a newer one reports
    /// [`FetchOutcome::Superseded`] and leaves the newer result in place.
    async fn refresh(
        &self,
        engine: &dyn QueryEngine,
        table: &str,
        filters: &[Filter],
    ) -> Result<FetchOutcome, DataError>;

    fn controller(&self) -> &Mutex<SelectionController>;

    /// Current bins, if a fetch has succeeded
    fn bins(&self) -> Option<Arc<dyn SelectableBins>>;

    /// Message of the last failed fetch, cleared by the next success
    fn last_error(&self) -> Option<String>;

    fn pointer(&self, event: PointerEvent) {
        self.controller().lock().handle(event);
    }
}

/// One column bound to a planner
pub struct ColumnView<P: BinPlanner> {
    column: String,
    kind: ColumnKind,
    planner: P,
    bus: Arc<EventBus>,
    controller: Mutex<SelectionController>,
    bins: RwLock<Option<Arc<BinSet<P::Bin>>>>,
    error: RwLock<Option<String>>,
    generation: AtomicU64,
    layout_mode: LayoutMode,
    geometry: RwLock<TrackGeometry>,
}

impl<P> ColumnView<P>
where
    P: BinPlanner + 'static,
    BinSet<P::Bin>: SelectableBins,
{
    pub fn new(
        column: impl Into<String>,
        kind: ColumnKind,
        planner: P,
        interaction: InteractionSettings,
        bus: Arc<EventBus>,
    ) -> Self {
        let column = column.into();
        let layout_mode = match kind {
            ColumnKind::Categorical => LayoutMode::Proportional,
            ColumnKind::Numeric | ColumnKind::Temporal => LayoutMode::Uniform,
        };
        Self {
            controller: Mutex::new(SelectionController::new(column.clone(), interaction, Arc::clone(&bus))),
            column,
            kind,
            planner,
            bus,
            bins: RwLock::new(None),
            error: RwLock::new(None),
            generation: AtomicU64::new(0),
            layout_mode,
            geometry: RwLock::new(TrackGeometry::default()),
        }
    }

    pub fn with_geometry(self, geometry: TrackGeometry) -> Self {
        *self.geometry.write() = geometry;
        self
    }

    /// Typed bins of the last successful fetch
    pub fn bin_set(&self) -> Option<Arc<BinSet<P::Bin>>> {
        self.bins.read().clone()
    }

    /// Resize the track, keeping the current interaction state
    pub fn set_geometry(&self, geometry: TrackGeometry) {
        *self.geometry.write() = geometry;
        if let Some(bins) = self.bin_set() {
            let layout = BinLayout::for_bins(bins.as_ref(), self.layout_mode, geometry);
            self.controller.lock().set_layout(layout);
        }
    }
}

#[async_trait]
impl<P> ColumnHandle for ColumnView<P>
where
    P: BinPlanner + 'static,
    BinSet<P::Bin>: SelectableBins,
{
    fn column(&self) -> &str {
        &self.column
    }

    fn kind(&self) -> ColumnKind {
        self.kind
    }

    async fn refresh(
        &self,
        engine: &dyn QueryEngine,
        table: &str,
        filters: &[Filter],
    ) -> Result<FetchOutcome, DataError> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.controller.lock().invalidate();

        let result = self.planner.fetch(engine, table, &self.column, filters).await;

        let mut controller = self.controller.lock();
        if self.generation.load(Ordering::SeqCst) != ticket {
            debug!(column = %self.column, ticket, "discarding superseded fetch");
            return Ok(FetchOutcome::Superseded);
        }

        match result {
            Ok(set) => {
                let set = Arc::new(set);
                let view: Arc<dyn SelectableBins> = set.clone();
                let layout = BinLayout::for_bins(view.as_ref(), self.layout_mode, *self.geometry.read());
                let bin_count = set.len();
                *self.bins.write() = Some(set);
                *self.error.write() = None;
                controller.set_bins(view, layout);
                drop(controller);

                self.bus.publish(BinsFetched { column: self.column.clone(), bin_count });
                Ok(FetchOutcome::Applied { bins: bin_count })
            }
            Err(e) => {
                drop(controller);
                let message = error_chain(&e);
                warn!(column = %self.column, error = %message, "column fetch failed");
                *self.bins.write() = None;
                *self.error.write() = Some(message.clone());
                self.bus.publish(FetchFailed { column: self.column.clone(), error: message });
                Err(e)
            }
        }
    }

    fn controller(&self) -> &Mutex<SelectionController> {
        &self.controller
    }

    fn bins(&self) -> Option<Arc<dyn SelectableBins>> {
        self.bin_set().map(|set| set as Arc<dyn SelectableBins>)
    }

    fn last_error(&self) -> Option<String> {
        self.error.read().clone()
    }
}

/// `outer: cause: root` rendering of an error and its sources
pub fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use arrow::record_batch::RecordBatch;
    use xf_data::{NumericBinPlanner, SqliteEngine};

    use crate::selection::InteractionState;

    /// Delays every query that mentions `slow`
    struct GatedEngine {
        inner: SqliteEngine,
    }

    #[async_trait]
    impl QueryEngine for GatedEngine {
        async fn query(&self, sql: &str) -> anyhow::Result<RecordBatch> {
            if sql.contains("slow") {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.inner.query(sql).await
        }

        fn engine_name(&self) -> &str {
            "gated"
        }
    }

    fn engine() -> SqliteEngine {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .execute_batch(
                "CREATE TABLE t (v REAL, tag TEXT);
                 INSERT INTO t VALUES (1, 'a'), (2, 'a'), (3, 'b'), (4, 'b'), (5, 'c'), (NULL, 'c');",
            )
            .unwrap();
        engine
    }

    fn view(bus: Arc<EventBus>) -> ColumnView<NumericBinPlanner> {
        ColumnView::new(
            "v",
            ColumnKind::Numeric,
            NumericBinPlanner::default(),
            InteractionSettings::default(),
            bus,
        )
    }

    #[tokio::test]
    async fn test_refresh_installs_bins() {
        let bus = Arc::new(EventBus::new());
        let fetched = Arc::new(Mutex::new(Vec::new()));
        let sink = fetched.clone();
        bus.subscribe_fn::<BinsFetched, _>(move |e| sink.lock().push(e.bin_count));

        let view = view(bus);
        assert_eq!(view.controller().lock().state(), &InteractionState::Unavailable);

        let outcome = view.refresh(&engine(), "t", &[]).await.unwrap();
        let bins = view.bins().unwrap();
        assert_eq!(outcome, FetchOutcome::Applied { bins: bins.len() });
        assert_eq!(bins.total(), 6);
        assert_eq!(bins.null_count(), 1);
        assert_eq!(view.controller().lock().state(), &InteractionState::Idle);
        assert!(view.controller().lock().layout().null_extent().is_some());
        assert_eq!(*fetched.lock(), vec![bins.len()]);
    }

    #[tokio::test]
    async fn test_last_fetch_wins() {
        let view = view(Arc::new(EventBus::new()));
        let engine = GatedEngine { inner: engine() };

        let slow = vec![Filter::pattern("tag", "%slow%")];
        let (first, second) = tokio::join!(view.refresh(&engine, "t", &slow), view.refresh(&engine, "t", &[]));

        assert_eq!(first.unwrap(), FetchOutcome::Superseded);
        assert!(matches!(second.unwrap(), FetchOutcome::Applied { .. }));
        assert_eq!(view.bins().unwrap().total(), 6);
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_recoverable() {
        let bus = Arc::new(EventBus::new());
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        bus.subscribe_fn::<FetchFailed, _>(move |e| sink.lock().push(e.error.clone()));

        let view = view(bus);
        let engine = engine();
        assert!(view.refresh(&engine, "missing", &[]).await.is_err());
        assert!(view.bins().is_none());
        let error = view.last_error().unwrap();
        assert!(error.starts_with("failed to fetch numeric data for column v: "));
        assert_eq!(failures.lock().len(), 1);

        view.refresh(&engine, "t", &[]).await.unwrap();
        assert!(view.last_error().is_none());
        assert_eq!(view.controller().lock().state(), &InteractionState::Idle);
    }

    #[test]
    fn test_error_chain() {
        let inner = DataError::MissingColumn("x".into());
        let outer = DataError::fetch("numeric", "v", inner);
        assert_eq!(
            error_chain(&outer),
            "failed to fetch numeric data for column v: Query result has no column `x`"
        );
    }
}
