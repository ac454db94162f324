//! Widget settings

use std::path::Path;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Settings for all column visualizations of a widget
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WidgetSettings {
    /// Bin planning settings
    pub binning: BinningSettings,

    /// Pointer gesture settings
    pub interaction: InteractionSettings,

    /// Query composition settings
    pub crossfilter: CrossfilterSettings,
}

/// How numeric histograms choose their bin count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "bins", rename_all = "snake_case")]
pub enum BinStrategy {
    /// Freedman-Diaconis when the IQR is positive, Sturges otherwise
    Auto,
    Sturges,
    FreedmanDiaconis,
    SquareRoot,
    Fixed(usize),
}

/// Bin planning settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BinningSettings {
    /// Upper bound on numeric histogram bins
    pub max_bins: usize,

    /// Lower bound on numeric histogram bins (non-degenerate data)
    pub min_bins: usize,

    /// Upper bound on temporal bins before coarsening
    pub temporal_max_bins: usize,

    /// Categories shown before the "other" bucket
    pub max_categories: usize,

    /// Bin count rule
    pub strategy: BinStrategy,
}

impl Default for BinningSettings {
    fn default() -> Self {
        Self {
            max_bins: 20,
            min_bins: 5,
            temporal_max_bins: 20,
            max_categories: 10,
            strategy: BinStrategy::Auto,
        }
    }
}

/// Pointer gesture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InteractionSettings {
    /// Maximum gap between two presses of a double click
    pub double_click_ms: u64,

    /// Maximum distance between two presses of a double click
    pub double_click_px: f32,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            double_click_ms: 300,
            double_click_px: 20.0,
        }
    }
}

/// Query composition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrossfilterSettings {
    /// Compute each column without its own filters
    pub exclude_own_filter: bool,
}

impl Default for CrossfilterSettings {
    fn default() -> Self {
        Self {
            exclude_own_filter: true,
        }
    }
}

impl WidgetSettings {
    /// Parse settings from JSON; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let binning = &self.binning;
        if binning.max_bins == 0 {
            return Err(ConfigError::Invalid {
                field: "binning.max_bins",
                reason: "must be at least 1".to_string(),
            });
        }
        if binning.min_bins > binning.max_bins {
            return Err(ConfigError::Invalid {
                field: "binning.min_bins",
                reason: format!("{} exceeds max_bins {}", binning.min_bins, binning.max_bins),
            });
        }
        if binning.temporal_max_bins == 0 {
            return Err(ConfigError::Invalid {
                field: "binning.temporal_max_bins",
                reason: "must be at least 1".to_string(),
            });
        }
        if binning.max_categories == 0 {
            return Err(ConfigError::Invalid {
                field: "binning.max_categories",
                reason: "must be at least 1".to_string(),
            });
        }
        let px = self.interaction.double_click_px;
        if px.is_nan() || px < 0.0 {
            return Err(ConfigError::Invalid {
                field: "interaction.double_click_px",
                reason: "must be a non-negative number".to_string(),
            });
        }
        Ok(())
    }
}
