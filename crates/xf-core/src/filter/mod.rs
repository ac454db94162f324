//! Declarative filters produced by column interactions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod predicate;

/// A literal value carried by a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl FilterValue {
    /// Whether this value formats as SQL `NULL` (null or a non-finite number)
    pub fn is_null_like(&self) -> bool {
        match self {
            FilterValue::Null => true,
            FilterValue::Number(n) => !n.is_finite(),
            _ => false,
        }
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Number(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value as f64)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

/// What a filter constrains its column to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterKind {
    /// `[min, max)`, or `[min, max]` when `inclusive_max` is set
    Range {
        min: FilterValue,
        max: FilterValue,
        #[serde(default)]
        inclusive_max: bool,
    },
    Point { value: FilterValue },
    Set { values: Vec<FilterValue> },
    /// Exclusion list, used by the categorical "other" bucket
    NotSet { values: Vec<FilterValue> },
    Null,
    NotNull,
    /// SQL `LIKE` pattern, wildcards passed through verbatim
    Pattern { pattern: String },
}

/// A filter on a single column
///
/// Filters are plain values: they never reference a connection and are
/// owned by whatever filter list the host keeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    #[serde(flatten)]
    pub kind: FilterKind,
}

impl Filter {
    pub fn new(column: impl Into<String>, kind: FilterKind) -> Self {
        Self {
            column: column.into(),
            kind,
        }
    }

    /// Half-open range filter `[min, max)`
    pub fn range(column: impl Into<String>, min: impl Into<FilterValue>, max: impl Into<FilterValue>) -> Self {
        Self::new(column, FilterKind::Range {
            min: min.into(),
            max: max.into(),
            inclusive_max: false,
        })
    }

    /// Closed range filter `[min, max]`
    pub fn closed_range(column: impl Into<String>, min: impl Into<FilterValue>, max: impl Into<FilterValue>) -> Self {
        Self::new(column, FilterKind::Range {
            min: min.into(),
            max: max.into(),
            inclusive_max: true,
        })
    }

    pub fn point(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(column, FilterKind::Point { value: value.into() })
    }

    pub fn set(column: impl Into<String>, values: Vec<FilterValue>) -> Self {
        Self::new(column, FilterKind::Set { values })
    }

    pub fn not_set(column: impl Into<String>, values: Vec<FilterValue>) -> Self {
        Self::new(column, FilterKind::NotSet { values })
    }

    pub fn null(column: impl Into<String>) -> Self {
        Self::new(column, FilterKind::Null)
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Self::new(column, FilterKind::NotNull)
    }

    pub fn pattern(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(column, FilterKind::Pattern { pattern: pattern.into() })
    }

    /// Whether `other` targets the same column with the same kind of constraint
    pub fn same_slot(&self, other: &Filter) -> bool {
        self.column == other.column
            && std::mem::discriminant(&self.kind) == std::mem::discriminant(&other.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_slot_ignores_payload() {
        let a = Filter::range("price", 1.0, 2.0);
        let b = Filter::range("price", 5.0, 9.0);
        let c = Filter::point("price", 5.0);

        assert!(a.same_slot(&b));
        assert!(!a.same_slot(&c));
        assert!(!a.same_slot(&Filter::range("qty", 1.0, 2.0)));
    }

    #[test]
    fn test_filter_json_shape() {
        let filter = Filter::point("active", true);
        let json = serde_json::to_value(&filter).unwrap();

        assert_eq!(json["column"], "active");
        assert_eq!(json["kind"], "point");
        assert_eq!(json["value"]["type"], "bool");

        let back: Filter = serde_json::from_value(json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_non_finite_is_null_like() {
        assert!(FilterValue::Number(f64::NAN).is_null_like());
        assert!(FilterValue::Number(f64::INFINITY).is_null_like());
        assert!(!FilterValue::Number(0.0).is_null_like());
        assert!(FilterValue::Null.is_null_like());
    }
}
