//! Plain-text rendering of column bins

use std::fmt::Write;

use xf_views::{describe, format_count, ColumnHandle, InteractionState, Target, NULL_LABEL};

const BAR_WIDTH: usize = 40;

/// Render one column as a labelled bar list
///
/// Bins covered by the column's selection or brush are marked with `*`.
pub fn render_column(column: &dyn ColumnHandle) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", column.column(), column.kind());

    if let Some(error) = column.last_error() {
        let _ = writeln!(out, "  error: {error}");
        return out;
    }
    let Some(bins) = column.bins() else {
        let _ = writeln!(out, "  (not loaded)");
        return out;
    };

    let (marked, null_marked, stats) = {
        let controller = column.controller().lock();
        let marked: Box<dyn Fn(usize) -> bool> = match controller.state() {
            InteractionState::Selected { target: Target::Bin(index), .. } => {
                let index = *index;
                Box::new(move |i| i == index)
            }
            InteractionState::BrushCommitted(range) | InteractionState::BrushSliding { range, .. } => {
                let range = *range;
                Box::new(move |i| i >= range.start && i <= range.end)
            }
            _ => Box::new(|_| false),
        };
        let null_marked = matches!(controller.state(), InteractionState::Selected { target: Target::Null, .. });
        (marked, null_marked, controller.stats_text().map(str::to_string))
    };

    let peak = (0..bins.len())
        .filter_map(|i| bins.count_at(i))
        .chain(std::iter::once(bins.null_count()))
        .max()
        .unwrap_or(0);
    let rows: Vec<(String, u64, bool)> = (0..bins.len())
        .map(|i| (bins.label_at(i).unwrap_or_default(), bins.count_at(i).unwrap_or(0), marked(i)))
        .chain((bins.null_count() > 0).then(|| (NULL_LABEL.to_string(), bins.null_count(), null_marked)))
        .collect();
    let label_width = rows.iter().map(|(label, _, _)| label.chars().count()).max().unwrap_or(0);

    if rows.is_empty() {
        let _ = writeln!(out, "  (no rows)");
    }
    for (label, count, mark) in rows {
        let _ = writeln!(
            out,
            " {} {:<label_width$}  {:<bar_width$}  {}",
            if mark { '*' } else { ' ' },
            label,
            bar(count, peak),
            format_count(count),
            label_width = label_width,
            bar_width = BAR_WIDTH,
        );
    }
    let _ = writeln!(out, "  {}", describe("total", bins.total(), bins.total()));
    if let Some(stats) = stats {
        let _ = writeln!(out, "  selected {stats}");
    }
    out
}

fn bar(count: u64, peak: u64) -> String {
    if peak == 0 {
        return String::new();
    }
    let filled = ((count as f64 / peak as f64) * BAR_WIDTH as f64).round() as usize;
    let filled = if count > 0 { filled.max(1) } else { 0 };
    "#".repeat(filled)
}
