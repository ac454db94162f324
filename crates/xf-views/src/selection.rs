//! Per-column hover, click selection and brush state machine
//!
//! The controller turns pointer input over one column's bins into a single
//! [`InteractionState`], publishes stats text for the active state, and
//! requests filters for click selections and committed brushes. Indices are
//! only ever trusted against the bin set installed by [`SelectionController::set_bins`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use xf_core::events::events::{
    BrushCleared, BrushCommitted, FilterCleared, FilterRequested, SelectionChanged, StatsChanged,
};
use xf_core::{EventBus, Filter, InteractionSettings};
use xf_data::SelectableBins;

use crate::layout::{BinLayout, BinRange};
use crate::pointer::PointerEvent;
use crate::stats::{describe, NULL_LABEL};

/// What the pointer is over or what is selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Bin(usize),
    Null,
}

/// A press held while a click selection is frozen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Press {
    pub x: f32,
    pub y: f32,
    pub dragged: bool,
}

/// Interaction state of one column
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionState {
    /// No bin set, or a fetch is in flight
    Unavailable,
    Idle,
    Hovering(Target),
    /// Button down, not yet moved
    Pressed { x: f32, y: f32, target: Option<Target> },
    /// Frozen click selection
    Selected { target: Target, press: Option<Press> },
    /// Drag in progress; `range` is `None` until the span covers a bin
    BrushCreating { anchor_x: f32, range: Option<BinRange> },
    BrushCommitted(BinRange),
    /// Committed brush being dragged by whole bins
    BrushSliding { origin_x: f32, origin: BinRange, range: BinRange },
    /// Ignore input until the button is released
    Swallowing,
}

/// Serializable click selection record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSnapshot {
    pub selected_index: Option<usize>,
    pub is_null_selected: bool,
}

/// Serializable brush record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrushSnapshot {
    pub start_index: usize,
    pub end_index: usize,
    pub committed: bool,
    pub sliding: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ClickRecord {
    x: f32,
    y: f32,
    time_ms: u64,
}

/// Interaction state machine for one column
pub struct SelectionController {
    column: String,
    settings: InteractionSettings,
    bus: Arc<EventBus>,
    bins: Option<Arc<dyn SelectableBins>>,
    layout: BinLayout,
    state: InteractionState,
    last_click: Option<ClickRecord>,
    stats_text: Option<String>,
}

impl SelectionController {
    pub fn new(column: impl Into<String>, settings: InteractionSettings, bus: Arc<EventBus>) -> Self {
        Self {
            column: column.into(),
            settings,
            bus,
            bins: None,
            layout: BinLayout::default(),
            state: InteractionState::Unavailable,
            last_click: None,
            stats_text: None,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn layout(&self) -> &BinLayout {
        &self.layout
    }

    /// Current stats text, `None` for the default
    pub fn stats_text(&self) -> Option<&str> {
        self.stats_text.as_deref()
    }

    /// Whether a click selection or committed brush is showing
    pub fn has_active_selection(&self) -> bool {
        matches!(
            self.state,
            InteractionState::Selected { .. }
                | InteractionState::BrushCommitted(_)
                | InteractionState::BrushSliding { .. }
        )
    }

    /// Filter the showing selection or brush stands for
    pub fn active_filter(&self) -> Option<Filter> {
        match &self.state {
            InteractionState::Selected { target, .. } => self.filter_for_target(*target),
            InteractionState::BrushCommitted(range) | InteractionState::BrushSliding { range, .. } => self
                .bins
                .as_ref()
                .and_then(|b| b.filter_for_range(&self.column, range.start, range.end)),
            _ => None,
        }
    }

    /// Drop every index tied to the current bins and refuse input until
    /// [`SelectionController::set_bins`] installs a new set
    pub fn invalidate(&mut self) {
        trace!(column = %self.column, "invalidating interaction state");
        self.bins = None;
        self.layout = BinLayout::default();
        self.state = InteractionState::Unavailable;
        self.last_click = None;
        self.emit_stats(None);
    }

    /// Install a freshly fetched bin set and reset to `Idle`
    pub fn set_bins(&mut self, bins: Arc<dyn SelectableBins>, layout: BinLayout) {
        self.bins = Some(bins);
        self.layout = layout;
        self.state = InteractionState::Idle;
        self.last_click = None;
        self.emit_stats(None);
    }

    /// Replace the pixel layout without touching the bins
    ///
    /// A layout for a different number of bins is ignored.
    pub fn set_layout(&mut self, layout: BinLayout) {
        if self.bins.as_ref().map(|b| b.len()) == Some(layout.len()) {
            self.layout = layout;
        }
    }

    pub fn handle(&mut self, event: PointerEvent) {
        match event {
            PointerEvent::Move { x, y } => self.pointer_move(x, y),
            PointerEvent::Down { x, y, time_ms } => self.pointer_down(x, y, time_ms),
            PointerEvent::Up { x, y, time_ms } => self.pointer_up(x, y, time_ms),
            PointerEvent::Leave => self.pointer_leave(),
        }
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        match self.state.clone() {
            InteractionState::Unavailable | InteractionState::Swallowing | InteractionState::BrushCommitted(_) => {}
            InteractionState::Idle | InteractionState::Hovering(_) => self.update_hover(x),
            InteractionState::Pressed { x: press_x, .. } => {
                if x != press_x && self.layout.track_contains(press_x) {
                    let range = self.layout.covered(press_x, x);
                    self.state = InteractionState::BrushCreating { anchor_x: press_x, range };
                    self.emit_stats(range.and_then(|r| self.range_text(r)));
                }
            }
            InteractionState::Selected { target, press: Some(press) } => {
                if !press.dragged && (x != press.x || y != press.y) {
                    self.state = InteractionState::Selected {
                        target,
                        press: Some(Press { dragged: true, ..press }),
                    };
                }
            }
            InteractionState::Selected { press: None, .. } => {}
            InteractionState::BrushCreating { anchor_x, range } => {
                let covered = self.layout.covered(anchor_x, x);
                if covered != range {
                    self.state = InteractionState::BrushCreating { anchor_x, range: covered };
                    self.emit_stats(covered.and_then(|r| self.range_text(r)));
                }
            }
            InteractionState::BrushSliding { origin_x, origin, range } => {
                let shifted = self.slide(origin, x - origin_x);
                if shifted != range {
                    self.state = InteractionState::BrushSliding { origin_x, origin, range: shifted };
                    self.emit_stats(self.range_text(shifted));
                }
            }
        }
    }

    pub fn pointer_down(&mut self, x: f32, y: f32, time_ms: u64) {
        match self.state.clone() {
            InteractionState::Idle | InteractionState::Hovering(_) => {
                self.state = InteractionState::Pressed { x, y, target: self.target_at(x) };
            }
            InteractionState::Selected { target, .. } => {
                self.state = InteractionState::Selected {
                    target,
                    press: Some(Press { x, y, dragged: false }),
                };
            }
            InteractionState::BrushCommitted(range) => {
                let click = ClickRecord { x, y, time_ms };
                if !self.layout.range_contains(range, x) {
                    debug!(column = %self.column, "press outside brush clears it");
                    self.clear_brush();
                    self.state = InteractionState::Swallowing;
                } else if self.is_double_click(click) {
                    debug!(column = %self.column, "double click clears brush");
                    self.last_click = None;
                    self.clear_brush();
                    self.state = InteractionState::Swallowing;
                } else {
                    self.last_click = Some(click);
                    self.state = InteractionState::BrushSliding { origin_x: x, origin: range, range };
                }
            }
            InteractionState::Unavailable
            | InteractionState::Pressed { .. }
            | InteractionState::BrushCreating { .. }
            | InteractionState::BrushSliding { .. }
            | InteractionState::Swallowing => {}
        }
    }

    pub fn pointer_up(&mut self, x: f32, _y: f32, _time_ms: u64) {
        match self.state.clone() {
            InteractionState::Pressed { target, .. } => match target.filter(|t| self.is_selectable(*t)) {
                Some(target) => self.select(target),
                None => {
                    self.state = InteractionState::Idle;
                    self.update_hover(x);
                }
            },
            InteractionState::Selected { target, press: Some(press) } => {
                if press.dragged {
                    self.state = InteractionState::Selected { target, press: None };
                } else {
                    self.clear_selection();
                    self.state = InteractionState::Idle;
                    self.update_hover(x);
                }
            }
            InteractionState::BrushCreating { range, .. } => match range {
                Some(range) => self.commit_brush(range),
                None => {
                    self.state = InteractionState::Idle;
                    self.emit_stats(None);
                    self.update_hover(x);
                }
            },
            InteractionState::BrushSliding { origin, range, .. } => {
                if range != origin {
                    self.last_click = None;
                    self.commit_brush(range);
                } else {
                    self.state = InteractionState::BrushCommitted(range);
                }
            }
            InteractionState::Swallowing => {
                self.state = InteractionState::Idle;
                self.update_hover(x);
            }
            InteractionState::Unavailable
            | InteractionState::Idle
            | InteractionState::Hovering(_)
            | InteractionState::Selected { press: None, .. }
            | InteractionState::BrushCommitted(_) => {}
        }
    }

    pub fn pointer_leave(&mut self) {
        if let InteractionState::Hovering(_) = self.state {
            self.state = InteractionState::Idle;
            self.emit_stats(None);
        }
    }

    /// Clear whichever selection or brush is active; returns whether anything was cleared
    pub fn cancel(&mut self) -> bool {
        match self.state.clone() {
            InteractionState::Selected { .. } => {
                self.clear_selection();
                self.state = InteractionState::Idle;
                true
            }
            InteractionState::BrushCommitted(_) | InteractionState::BrushSliding { .. } => {
                self.clear_brush();
                self.state = InteractionState::Idle;
                true
            }
            InteractionState::BrushCreating { .. } => {
                self.state = InteractionState::Idle;
                self.emit_stats(None);
                true
            }
            _ => false,
        }
    }

    /// Click selection for session save
    pub fn selection_state(&self) -> SelectionSnapshot {
        match self.state {
            InteractionState::Selected { target: Target::Bin(index), .. } => SelectionSnapshot {
                selected_index: Some(index),
                is_null_selected: false,
            },
            InteractionState::Selected { target: Target::Null, .. } => SelectionSnapshot {
                selected_index: None,
                is_null_selected: true,
            },
            _ => SelectionSnapshot::default(),
        }
    }

    /// Restore a click selection against the current bins
    ///
    /// Records that do not fit the current bins are ignored. Restoring does
    /// not request a filter; the filter list is restored by its owner.
    /// Returns whether the record was applied.
    pub fn set_selection_state(&mut self, snapshot: &SelectionSnapshot) -> bool {
        let target = match (snapshot.selected_index, snapshot.is_null_selected) {
            (Some(index), false) => Target::Bin(index),
            (None, true) => Target::Null,
            _ => return false,
        };
        if !self.accepts_input() || !self.is_valid_target(target) {
            return false;
        }
        if let InteractionState::Selected { target: current, .. } = self.state {
            if current == target {
                return true;
            }
        }
        self.reset_to_idle();
        self.state = InteractionState::Selected { target, press: None };
        self.emit_stats(self.target_text(target));
        self.bus.publish(SelectionChanged { column: self.column.clone(), selected: true });
        true
    }

    /// Brush for session save
    pub fn brush_state(&self) -> Option<BrushSnapshot> {
        match self.state {
            InteractionState::BrushCommitted(range) => Some(BrushSnapshot {
                start_index: range.start,
                end_index: range.end,
                committed: true,
                sliding: false,
            }),
            InteractionState::BrushSliding { range, .. } => Some(BrushSnapshot {
                start_index: range.start,
                end_index: range.end,
                committed: true,
                sliding: true,
            }),
            InteractionState::BrushCreating { range: Some(range), .. } => Some(BrushSnapshot {
                start_index: range.start,
                end_index: range.end,
                committed: false,
                sliding: false,
            }),
            _ => None,
        }
    }

    /// Restore a brush against the current bins as a committed brush
    ///
    /// Same validation and filter rules as [`SelectionController::set_selection_state`].
    pub fn set_brush_state(&mut self, snapshot: &BrushSnapshot) -> bool {
        let len = self.bins.as_ref().map_or(0, |b| b.len());
        if !self.accepts_input() || snapshot.start_index > snapshot.end_index || snapshot.end_index >= len {
            return false;
        }
        let range = BinRange::new(snapshot.start_index, snapshot.end_index);
        if self.state == InteractionState::BrushCommitted(range) {
            return true;
        }
        self.reset_to_idle();
        self.state = InteractionState::BrushCommitted(range);
        self.emit_stats(self.range_text(range));
        self.bus.publish(BrushCommitted {
            column: self.column.clone(),
            start_index: range.start,
            end_index: range.end,
        });
        true
    }

    fn accepts_input(&self) -> bool {
        self.bins.is_some() && self.state != InteractionState::Unavailable
    }

    /// Clear selection or brush through the normal notifications
    fn reset_to_idle(&mut self) {
        match self.state {
            InteractionState::Selected { .. } => self.clear_selection(),
            InteractionState::BrushCommitted(_) | InteractionState::BrushSliding { .. } => self.clear_brush(),
            _ => {}
        }
        self.state = InteractionState::Idle;
    }

    fn target_at(&self, x: f32) -> Option<Target> {
        let bins = self.bins.as_ref()?;
        match self.layout.index_at(x) {
            Some(index) if index < bins.len() => Some(Target::Bin(index)),
            Some(_) => None,
            None => (self.layout.null_contains(x) && bins.null_count() > 0).then_some(Target::Null),
        }
    }

    fn is_valid_target(&self, target: Target) -> bool {
        match (&self.bins, target) {
            (Some(bins), Target::Bin(index)) => index < bins.len(),
            (Some(bins), Target::Null) => bins.null_count() > 0,
            (None, _) => false,
        }
    }

    /// Valid and non-empty
    fn is_selectable(&self, target: Target) -> bool {
        match (&self.bins, target) {
            (Some(bins), Target::Bin(index)) => bins.count_at(index).map_or(false, |c| c > 0),
            (Some(bins), Target::Null) => bins.null_count() > 0,
            (None, _) => false,
        }
    }

    fn update_hover(&mut self, x: f32) {
        let next = match self.target_at(x) {
            Some(target) => InteractionState::Hovering(target),
            None => InteractionState::Idle,
        };
        if next != self.state {
            let text = match next {
                InteractionState::Hovering(target) => self.target_text(target),
                _ => None,
            };
            self.state = next;
            self.emit_stats(text);
        }
    }

    fn select(&mut self, target: Target) {
        self.state = InteractionState::Selected { target, press: None };
        self.emit_stats(self.target_text(target));
        self.bus.publish(SelectionChanged { column: self.column.clone(), selected: true });
        if let Some(filter) = self.filter_for_target(target) {
            self.bus.publish(FilterRequested { filter });
        }
    }

    fn clear_selection(&mut self) {
        self.emit_stats(None);
        self.bus.publish(SelectionChanged { column: self.column.clone(), selected: false });
        self.bus.publish(FilterCleared { column: self.column.clone() });
    }

    fn commit_brush(&mut self, range: BinRange) {
        self.state = InteractionState::BrushCommitted(range);
        self.emit_stats(self.range_text(range));
        self.bus.publish(BrushCommitted {
            column: self.column.clone(),
            start_index: range.start,
            end_index: range.end,
        });
        let filter = self
            .bins
            .as_ref()
            .and_then(|b| b.filter_for_range(&self.column, range.start, range.end));
        if let Some(filter) = filter {
            self.bus.publish(FilterRequested { filter });
        }
    }

    fn clear_brush(&mut self) {
        self.emit_stats(None);
        self.bus.publish(BrushCleared { column: self.column.clone() });
        self.bus.publish(FilterCleared { column: self.column.clone() });
    }

    fn is_double_click(&self, click: ClickRecord) -> bool {
        self.last_click.map_or(false, |last| {
            let elapsed = click.time_ms.saturating_sub(last.time_ms);
            let distance = ((click.x - last.x).powi(2) + (click.y - last.y).powi(2)).sqrt();
            elapsed <= self.settings.double_click_ms && distance <= self.settings.double_click_px
        })
    }

    /// Shift `origin` by whole bins for a pointer delta, keeping its width
    /// and staying inside the data range
    fn slide(&self, origin: BinRange, dx: f32) -> BinRange {
        let len = self.bins.as_ref().map_or(0, |b| b.len());
        let step = self.layout.mean_bin_width();
        if len == 0 || step <= 0.0 {
            return origin;
        }
        let shift = (dx / step).round() as i64;
        let min_shift = -(origin.start as i64);
        let max_shift = (len - 1) as i64 - origin.end as i64;
        let shift = shift.clamp(min_shift, max_shift.max(min_shift));
        BinRange {
            start: (origin.start as i64 + shift) as usize,
            end: (origin.end as i64 + shift) as usize,
        }
    }

    fn filter_for_target(&self, target: Target) -> Option<Filter> {
        let bins = self.bins.as_ref()?;
        match target {
            Target::Bin(index) => bins.filter_for_bin(&self.column, index),
            Target::Null => bins.filter_for_nulls(&self.column),
        }
    }

    fn target_text(&self, target: Target) -> Option<String> {
        let bins = self.bins.as_ref()?;
        match target {
            Target::Bin(index) => {
                let label = bins.label_at(index)?;
                Some(describe(&label, bins.count_at(index)?, bins.total()))
            }
            Target::Null => Some(describe(NULL_LABEL, bins.null_count(), bins.total())),
        }
    }

    fn range_text(&self, range: BinRange) -> Option<String> {
        let bins = self.bins.as_ref()?;
        let label = bins.range_label(range.start, range.end)?;
        Some(describe(&label, bins.range_count(range.start, range.end), bins.total()))
    }

    fn emit_stats(&mut self, text: Option<String>) {
        if text != self.stats_text {
            self.stats_text = text.clone();
            self.bus.publish(StatsChanged { column: self.column.clone(), text });
        }
    }
}
