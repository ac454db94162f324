//! Column widgets for crossfilter exploration
//!
//! Each column is drawn as a strip of bins. A [`SelectionController`] turns
//! pointer input on that strip into selections and brushes, a [`ColumnView`]
//! keeps the controller in step with the bins it fetches, and the
//! [`Crossfilter`] coordinator routes the resulting filters to every other
//! column.

mod column;
mod crossfilter;
mod layout;
mod pointer;
mod selection;
mod stats;

pub use column::{error_chain, ColumnHandle, ColumnView, FetchOutcome};
pub use crossfilter::{ColumnSession, Crossfilter, RefreshReport, Session};
pub use layout::{BinLayout, BinRange, Extent, LayoutMode, TrackGeometry};
pub use pointer::{PointerEvent, PointerQueue};
pub use selection::{BrushSnapshot, InteractionState, Press, SelectionController, SelectionSnapshot, Target};
pub use stats::{describe, format_count, format_percent, NULL_LABEL};
