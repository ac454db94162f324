//! Pixel extents of the bins along a column's track

use xf_data::SelectableBins;

/// Horizontal span in track pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub start: f32,
    pub end: f32,
}

impl Extent {
    pub fn width(&self) -> f32 {
        self.end - self.start
    }
}

/// Inclusive range of bin indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinRange {
    pub start: usize,
    pub end: usize,
}

impl BinRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }
}

/// How bin widths are allotted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    /// Every bin gets the same width (histograms)
    #[default]
    Uniform,
    /// Width proportional to the bin count (stacked category bars)
    Proportional,
}

/// Track size in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackGeometry {
    pub width: f32,
    /// Width of the null bucket placed right of the bins
    pub null_width: f32,
    /// Gap between the last bin and the null bucket
    pub gap: f32,
}

impl Default for TrackGeometry {
    fn default() -> Self {
        Self {
            width: 200.0,
            null_width: 12.0,
            gap: 4.0,
        }
    }
}

/// Bin extents plus the optional null bucket extent
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BinLayout {
    extents: Vec<Extent>,
    null_extent: Option<Extent>,
}

impl BinLayout {
    /// `count` equal bins over `[origin, origin + width]`
    pub fn uniform(count: usize, origin: f32, width: f32) -> Self {
        let step = if count == 0 { 0.0 } else { width / count as f32 };
        let extents = (0..count)
            .map(|i| Extent {
                start: origin + step * i as f32,
                end: if i + 1 == count { origin + width } else { origin + step * (i + 1) as f32 },
            })
            .collect();
        Self { extents, null_extent: None }
    }

    /// Bins sized by share of the total count
    ///
    /// Falls back to uniform widths when every count is zero.
    pub fn proportional(counts: &[u64], origin: f32, width: f32) -> Self {
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return Self::uniform(counts.len(), origin, width);
        }
        let mut cursor = origin;
        let mut running = 0u64;
        let extents = counts
            .iter()
            .map(|&count| {
                running += count;
                let end = origin + width * (running as f64 / total as f64) as f32;
                let extent = Extent { start: cursor, end };
                cursor = end;
                extent
            })
            .collect();
        Self { extents, null_extent: None }
    }

    /// Layout for a bin set, reserving the null bucket when it has rows
    pub fn for_bins(bins: &dyn SelectableBins, mode: LayoutMode, geometry: TrackGeometry) -> Self {
        let bins_width = if bins.null_count() > 0 {
            (geometry.width - geometry.null_width - geometry.gap).max(0.0)
        } else {
            geometry.width
        };
        let layout = match mode {
            LayoutMode::Uniform => Self::uniform(bins.len(), 0.0, bins_width),
            LayoutMode::Proportional => {
                let counts: Vec<u64> = (0..bins.len()).filter_map(|i| bins.count_at(i)).collect();
                Self::proportional(&counts, 0.0, bins_width)
            }
        };
        if bins.null_count() > 0 {
            let start = bins_width + geometry.gap;
            layout.with_null_extent(start, start + geometry.null_width)
        } else {
            layout
        }
    }

    pub fn with_null_extent(mut self, start: f32, end: f32) -> Self {
        self.null_extent = Some(Extent { start, end });
        self
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn extent(&self, index: usize) -> Option<Extent> {
        self.extents.get(index).copied()
    }

    pub fn null_extent(&self) -> Option<Extent> {
        self.null_extent
    }

    /// Bin under `x`; the last bin includes its right edge
    pub fn index_at(&self, x: f32) -> Option<usize> {
        self.extents
            .iter()
            .position(|e| x >= e.start && x < e.end)
            .or_else(|| self.extents.iter().rposition(|e| e.width() > 0.0 && x == e.end))
    }

    pub fn null_contains(&self, x: f32) -> bool {
        self.null_extent.map_or(false, |e| x >= e.start && x <= e.end)
    }

    /// Whether `x` lies on the bins (not the null bucket)
    pub fn track_contains(&self, x: f32) -> bool {
        match (self.extents.first(), self.extents.last()) {
            (Some(first), Some(last)) => x >= first.start && x <= last.end,
            _ => false,
        }
    }

    /// Bins overlapping the span between `a` and `b`, partial overlap included
    ///
    /// A zero-width span covers nothing.
    pub fn covered(&self, a: f32, b: f32) -> Option<BinRange> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        if lo == hi {
            return None;
        }
        let mut hits = self
            .extents
            .iter()
            .enumerate()
            .filter(|(_, e)| e.width() > 0.0 && e.start < hi && e.end > lo)
            .map(|(i, _)| i);
        let first = hits.next()?;
        let last = hits.last().unwrap_or(first);
        Some(BinRange::new(first, last))
    }

    /// Whether `x` falls inside the pixel span of `range`
    pub fn range_contains(&self, range: BinRange, x: f32) -> bool {
        match (self.extent(range.start), self.extent(range.end)) {
            (Some(first), Some(last)) => x >= first.start && x <= last.end,
            _ => false,
        }
    }

    /// Mean bin width, the pixel size of one slide step
    pub fn mean_bin_width(&self) -> f32 {
        match (self.extents.first(), self.extents.last()) {
            (Some(first), Some(last)) => (last.end - first.start) / self.extents.len() as f32,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_hit_testing() {
        let layout = BinLayout::uniform(10, 0.0, 100.0);
        assert_eq!(layout.index_at(0.0), Some(0));
        assert_eq!(layout.index_at(29.9), Some(2));
        assert_eq!(layout.index_at(30.0), Some(3));
        assert_eq!(layout.index_at(100.0), Some(9));
        assert_eq!(layout.index_at(100.5), None);
        assert_eq!(layout.index_at(-1.0), None);
        assert_eq!(layout.mean_bin_width(), 10.0);
    }

    #[test]
    fn test_covered_counts_partial_overlap() {
        let layout = BinLayout::uniform(10, 0.0, 100.0);
        assert_eq!(layout.covered(25.0, 55.0), Some(BinRange::new(2, 5)));
        assert_eq!(layout.covered(55.0, 25.0), Some(BinRange::new(2, 5)));
        assert_eq!(layout.covered(21.0, 22.0), Some(BinRange::new(2, 2)));
        assert_eq!(layout.covered(30.0, 30.0), None);
        assert_eq!(layout.covered(-50.0, 500.0), Some(BinRange::new(0, 9)));
    }

    #[test]
    fn test_proportional_and_null_bucket() {
        let layout = BinLayout::proportional(&[3, 1, 0], 0.0, 80.0).with_null_extent(84.0, 96.0);
        assert_eq!(layout.extent(0), Some(Extent { start: 0.0, end: 60.0 }));
        assert_eq!(layout.extent(1), Some(Extent { start: 60.0, end: 80.0 }));
        assert_eq!(layout.index_at(70.0), Some(1));
        assert!(layout.null_contains(90.0));
        assert!(!layout.track_contains(90.0));
        assert_eq!(layout.covered(50.0, 90.0), Some(BinRange::new(0, 1)));
    }
}
