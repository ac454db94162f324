use std::sync::Arc;
use parking_lot::Mutex;
use ahash::AHashMap;

/// Event bus connecting column controllers to their host
pub struct EventBus {
    handlers: Arc<Mutex<AHashMap<std::any::TypeId, Vec<Box<dyn EventHandler>>>>>,
}

/// Event trait that all events must implement
pub trait Event: Send + Sync + 'static {
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Handler trait for event handlers
pub trait EventHandler: Send + Sync {
    fn handle(&mut self, event: &dyn Event);
}

/// Events published by column visualizations
pub mod events {
    use super::Event;
    use crate::filter::Filter;

    /// Hover/selection/brush description changed; `None` restores the default text
    #[derive(Debug, Clone, PartialEq)]
    pub struct StatsChanged {
        pub column: String,
        pub text: Option<String>,
    }

    /// A column asks the host to merge a filter into its active list
    #[derive(Debug, Clone, PartialEq)]
    pub struct FilterRequested {
        pub filter: Filter,
    }

    /// A column's interactive filter was withdrawn
    #[derive(Debug, Clone, PartialEq)]
    pub struct FilterCleared {
        pub column: String,
    }

    /// Click selection toggled
    #[derive(Debug, Clone, PartialEq)]
    pub struct SelectionChanged {
        pub column: String,
        pub selected: bool,
    }

    /// Brush settled on an inclusive bin index range
    #[derive(Debug, Clone, PartialEq)]
    pub struct BrushCommitted {
        pub column: String,
        pub start_index: usize,
        pub end_index: usize,
    }

    /// Brush removed
    #[derive(Debug, Clone, PartialEq)]
    pub struct BrushCleared {
        pub column: String,
    }

    /// A fresh bin set landed for a column
    #[derive(Debug, Clone, PartialEq)]
    pub struct BinsFetched {
        pub column: String,
        pub bin_count: usize,
    }

    /// A fetch failed; the message carries the wrapped context
    #[derive(Debug, Clone, PartialEq)]
    pub struct FetchFailed {
        pub column: String,
        pub error: String,
    }

    // Implement Event trait for all event types
    macro_rules! impl_event {
        ($($t:ty),*) => {
            $(
                impl Event for $t {
                    fn as_any(&self) -> &dyn std::any::Any {
                        self
                    }
                }
            )*
        }
    }

    impl_event!(
        StatsChanged,
        FilterRequested,
        FilterCleared,
        SelectionChanged,
        BrushCommitted,
        BrushCleared,
        BinsFetched,
        FetchFailed
    );
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(AHashMap::new())),
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<E: Event>(&self, handler: Box<dyn EventHandler>) {
        let type_id = std::any::TypeId::of::<E>();
        let mut handlers = self.handlers.lock();
        handlers.entry(type_id).or_insert_with(Vec::new).push(handler);
    }

    /// Subscribe with a closure that receives the concrete event type
    pub fn subscribe_fn<E, F>(&self, mut f: F)
    where
        E: Event,
        F: FnMut(&E) + Send + Sync + 'static,
    {
        self.subscribe::<E>(handler_from_fn(move |event: &dyn Event| {
            if let Some(event) = event.as_any().downcast_ref::<E>() {
                f(event);
            }
        }));
    }

    /// Publish an event
    ///
    /// Handlers run while the bus is locked and must not publish themselves.
    pub fn publish<E: Event>(&self, event: E) {
        let type_id = std::any::TypeId::of::<E>();
        let mut handlers = self.handlers.lock();

        if let Some(event_handlers) = handlers.get_mut(&type_id) {
            for handler in event_handlers.iter_mut() {
                handler.handle(&event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper struct for creating event handlers from closures
pub struct ClosureEventHandler<F> {
    handler: F,
}

impl<F> EventHandler for ClosureEventHandler<F>
where
    F: FnMut(&dyn Event) + Send + Sync,
{
    fn handle(&mut self, event: &dyn Event) {
        (self.handler)(event);
    }
}

/// Create an event handler from a closure
pub fn handler_from_fn<F>(f: F) -> Box<dyn EventHandler>
where
    F: FnMut(&dyn Event) + Send + Sync + 'static,
{
    Box::new(ClosureEventHandler { handler: f })
}
