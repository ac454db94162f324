//! Translation of filters into SQL predicate fragments

use chrono::{DateTime, SecondsFormat, Utc};

use super::{Filter, FilterKind, FilterValue};

/// Predicate that never matches a row
pub const ALWAYS_FALSE: &str = "(1 = 0)";

/// Predicate that matches every row
pub const ALWAYS_TRUE: &str = "(1 = 1)";

/// Quote a column or table identifier
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded quotes
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// ISO-8601 instant text, the form `date_trunc` buckets come back in
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Format a number as a SQL literal
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return "NULL".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Format a filter value as a SQL literal
pub fn format_value(value: &FilterValue) -> String {
    match value {
        FilterValue::Null => "NULL".to_string(),
        FilterValue::Bool(true) => "TRUE".to_string(),
        FilterValue::Bool(false) => "FALSE".to_string(),
        FilterValue::Number(n) => format_number(*n),
        FilterValue::Text(s) => quote_string(s),
        FilterValue::Timestamp(t) => quote_string(&format_instant(t)),
    }
}

/// Left-hand side for comparing `col` against `value`
///
/// Instants compare through `epoch_ms` so stored text in any accepted
/// layout orders by time rather than lexically.
fn operand(col: &str, value: &FilterValue) -> String {
    match value {
        FilterValue::Timestamp(_) => format!("epoch_ms({})", col),
        _ => col.to_string(),
    }
}

/// Right-hand literal matching [`operand`]
fn literal(value: &FilterValue) -> String {
    match value {
        FilterValue::Timestamp(t) => t.timestamp_millis().to_string(),
        other => format_value(other),
    }
}

fn compare(col: &str, op: &str, value: &FilterValue) -> String {
    format!("{} {} {}", operand(col, value), op, literal(value))
}

/// `IN` list over `values`, switching to epoch milliseconds when any is an instant
fn membership(col: &str, op: &str, values: &[FilterValue]) -> String {
    let lhs = match values.iter().find(|v| matches!(v, FilterValue::Timestamp(_))) {
        Some(instant) => operand(col, instant),
        None => col.to_string(),
    };
    let list = values.iter().map(literal).collect::<Vec<_>>().join(", ");
    format!("{} {} ({})", lhs, op, list)
}

/// Convert one filter into a predicate fragment
///
/// Timestamp values are compared as `epoch_ms(col)` against integer
/// milliseconds; every other value compares the raw column.
pub fn to_predicate(filter: &Filter) -> String {
    let col = quote_identifier(&filter.column);

    match &filter.kind {
        FilterKind::Range { min, max, inclusive_max } => {
            let mut bounds = Vec::with_capacity(2);
            if !min.is_null_like() {
                bounds.push(compare(&col, ">=", min));
            }
            if !max.is_null_like() {
                bounds.push(compare(&col, if *inclusive_max { "<=" } else { "<" }, max));
            }
            if bounds.is_empty() {
                format!("{} IS NOT NULL", col)
            } else {
                bounds.join(" AND ")
            }
        }
        FilterKind::Point { value } => {
            if value.is_null_like() {
                format!("{} IS NULL", col)
            } else {
                compare(&col, "=", value)
            }
        }
        FilterKind::Set { values } => {
            if values.is_empty() {
                return ALWAYS_FALSE.to_string();
            }
            let (nulls, concrete): (Vec<_>, Vec<_>) = values.iter().cloned().partition(|v| v.is_null_like());
            match (concrete.is_empty(), nulls.is_empty()) {
                (true, _) => format!("{} IS NULL", col),
                (false, true) => membership(&col, "IN", &concrete),
                (false, false) => format!("({} OR {} IS NULL)", membership(&col, "IN", &concrete), col),
            }
        }
        FilterKind::NotSet { values } => {
            let concrete: Vec<_> = values.iter().filter(|v| !v.is_null_like()).cloned().collect();
            if concrete.is_empty() {
                ALWAYS_TRUE.to_string()
            } else {
                membership(&col, "NOT IN", &concrete)
            }
        }
        FilterKind::Null => format!("{} IS NULL", col),
        FilterKind::NotNull => format!("{} IS NOT NULL", col),
        FilterKind::Pattern { pattern } => format!("{} LIKE {}", col, quote_string(pattern)),
    }
}

/// AND together predicate fragments, returning `None` when there are none
pub fn and_predicates<I>(parts: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let parts: Vec<String> = parts.into_iter().filter(|p| !p.is_empty()).collect();
    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(
            parts
                .iter()
                .map(|p| format!("({})", p))
                .collect::<Vec<_>>()
                .join(" AND "),
        ),
    }
}

/// Combine filters into one predicate, skipping every filter on `exclude_column`
///
/// Excluding a column's own filters is the crossfilter rule: that column's
/// chart shows the distribution under every other active constraint.
pub fn combine_predicates(filters: &[Filter], exclude_column: Option<&str>) -> Option<String> {
    and_predicates(
        filters
            .iter()
            .filter(|f| exclude_column.map_or(true, |col| f.column != col))
            .map(to_predicate),
    )
}

/// Build a `WHERE` clause, or an empty string when nothing applies
pub fn to_where_clause(filters: &[Filter], exclude_column: Option<&str>) -> String {
    match combine_predicates(filters, exclude_column) {
        Some(predicate) => format!("WHERE {}", predicate),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_is_half_open() {
        let filter = Filter::range("price", 10.0, 100.0);
        assert_eq!(to_predicate(&filter), "\"price\" >= 10 AND \"price\" < 100");

        let closed = Filter::closed_range("price", 10.0, 100.5);
        assert_eq!(to_predicate(&closed), "\"price\" >= 10 AND \"price\" <= 100.5");
    }

    #[test]
    fn test_range_with_infinite_bound_is_one_sided() {
        let filter = Filter::range("price", f64::NEG_INFINITY, 5.0);
        assert_eq!(to_predicate(&filter), "\"price\" < 5");
    }

    #[test]
    fn test_point_and_null_forms() {
        assert_eq!(to_predicate(&Filter::point("active", true)), "\"active\" = TRUE");
        assert_eq!(to_predicate(&Filter::point("score", f64::NAN)), "\"score\" IS NULL");
        assert_eq!(to_predicate(&Filter::null("score")), "\"score\" IS NULL");
        assert_eq!(to_predicate(&Filter::not_null("score")), "\"score\" IS NOT NULL");
    }

    #[test]
    fn test_set_forms() {
        let filter = Filter::set("city", vec!["Paris".into(), "Rome".into()]);
        assert_eq!(to_predicate(&filter), "\"city\" IN ('Paris', 'Rome')");

        let empty = Filter::set("city", vec![]);
        assert_eq!(to_predicate(&empty), ALWAYS_FALSE);

        let not_set = Filter::not_set("city", vec!["Paris".into()]);
        assert_eq!(to_predicate(&not_set), "\"city\" NOT IN ('Paris')");

        let with_null = Filter::set("city", vec!["Paris".into(), FilterValue::Null]);
        assert_eq!(to_predicate(&with_null), "(\"city\" IN ('Paris') OR \"city\" IS NULL)");
    }

    #[test]
    fn test_quotes_are_doubled() {
        let filter = Filter::point("name", "O'Brien");
        assert_eq!(to_predicate(&filter), "\"name\" = 'O''Brien'");

        let odd_column = Filter::not_null("we\"ird");
        assert_eq!(to_predicate(&odd_column), "\"we\"\"ird\" IS NOT NULL");
    }

    #[test]
    fn test_pattern_passes_wildcards() {
        let filter = Filter::pattern("name", "A%_b");
        assert_eq!(to_predicate(&filter), "\"name\" LIKE 'A%_b'");
    }

    #[test]
    fn test_timestamps_compare_as_epoch_millis() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(format_value(&FilterValue::Timestamp(t)), "'2024-03-01T12:30:00.000Z'");

        let point = Filter::point("created", t);
        assert_eq!(to_predicate(&point), "epoch_ms(\"created\") = 1709296200000");

        let day = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();
        assert_eq!(
            to_predicate(&Filter::range("created", day, next)),
            "epoch_ms(\"created\") >= 1709337600000 AND epoch_ms(\"created\") < 1709424000000"
        );

        let set = Filter::set("created", vec![day.into(), FilterValue::Null]);
        assert_eq!(
            to_predicate(&set),
            "(epoch_ms(\"created\") IN (1709337600000) OR \"created\" IS NULL)"
        );
        assert_eq!(
            to_predicate(&Filter::not_set("created", vec![day.into()])),
            "epoch_ms(\"created\") NOT IN (1709337600000)"
        );
    }

    #[test]
    fn test_where_clause_joins_and_excludes() {
        let filters = vec![
            Filter::range("price", 10.0, 100.0),
            Filter::point("active", true),
        ];

        let clause = to_where_clause(&filters, None);
        assert!(clause.starts_with("WHERE "));
        assert!(clause.contains("\"price\" >= 10 AND \"price\" < 100"));
        assert!(clause.contains("\"active\" = TRUE"));
        assert!(clause.contains(") AND ("));

        let excluded = to_where_clause(&filters, Some("price"));
        assert_eq!(excluded, "WHERE \"active\" = TRUE");

        assert_eq!(to_where_clause(&[], None), "");
        assert_eq!(to_where_clause(&filters[..1], Some("price")), "");
    }
}
