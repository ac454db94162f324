//! Stats text shown for the hovered, selected or brushed bins

/// Row count with thousands separators
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Share of `total` with one decimal
pub fn format_percent(part: u64, total: u64) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    let pct = part as f64 * 100.0 / total as f64;
    let text = format!("{:.1}", pct);
    match text.strip_suffix(".0") {
        Some(whole) => format!("{}%", whole),
        None => format!("{}%", text),
    }
}

/// `label: 1,234 rows (12.5%)`
pub fn describe(label: &str, count: u64, total: u64) -> String {
    let noun = if count == 1 { "row" } else { "rows" };
    format!(
        "{}: {} {} ({})",
        label,
        format_count(count),
        noun,
        format_percent(count, total)
    )
}

/// Label used for the null bucket
pub const NULL_LABEL: &str = "null";
