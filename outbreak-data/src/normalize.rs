//! Result normalization helpers
//!
//! Pure, side-effect-free field derivations applied to decoded responses:
//! date parsing, label casing, percent and count formatting, display names
//! and recency windows. Nothing here reads shared state, so applying a helper
//! twice to the same input yields the same output.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use outbreak_common::time::calendar_days_between;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Label used when a proportion is positive but rounds to zero percent
pub const BELOW_HALF_PERCENT: &str = "< 0.5%";

/// Label for a location where the lineage has never been sequenced
pub const NOT_DETECTED: &str = "not detected";

/// Proportions below this render as [`BELOW_HALF_PERCENT`]
pub const PERCENT_FLOOR: f64 = 0.005;

/// Strict `YYYY-MM-DD` parse; anything else yields `None`
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Uppercase the first character; the token `"of"` is left alone
pub fn capitalize(value: &str) -> String {
    if value == "of" {
        return value.to_string();
    }
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Capitalize each space-separated token
pub fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-number percent (`0.456` → `"46%"`)
pub fn format_percent(proportion: f64) -> String {
    format!("{}%", (proportion * 100.0).round() as i64)
}

/// Percent label with the `"< 0.5%"` sentinel for tiny proportions
pub fn proportion_label(proportion: f64) -> String {
    if proportion < PERCENT_FLOOR {
        BELOW_HALF_PERCENT.to_string()
    } else {
        format_percent(proportion)
    }
}

/// Cumulative prevalence label: `"not detected"` when no sequences matched
pub fn cumulative_label(proportion: f64, lineage_count: u64) -> String {
    if lineage_count == 0 {
        NOT_DETECTED.to_string()
    } else {
        proportion_label(proportion)
    }
}

/// Integer with thousands separators (`1234567` → `"1,234,567"`)
pub fn format_count(count: i64) -> String {
    let digits = count.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if count < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Location label: `"name, state"`, else `"name, country"` when the country differs
pub fn display_name(name: &str, state_name: Option<&str>, country_name: Option<&str>) -> String {
    if let Some(state) = state_name.filter(|s| !s.is_empty()) {
        return format!("{}, {}", name, state);
    }
    match country_name.filter(|c| !c.is_empty()) {
        Some(country) if country != name => format!("{}, {}", name, country),
        _ => name.to_string(),
    }
}

/// True when `date` is fewer than two calendar days before `today`
pub fn is_new_today(date: NaiveDate, today: NaiveDate) -> bool {
    calendar_days_between(date, today) < 2
}

/// Parse a backend build timestamp (RFC 3339, `+hhmm` offsets, or naive UTC)
pub fn parse_build_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Age label for a build timestamp: `"12m"`, `"5h"`, `"3d"`
///
/// Timestamps ahead of `now` read as `"0m"`.
pub fn relative_age(updated: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let hours = ((now - updated).num_seconds() as f64 / 3600.0).max(0.0);
    if hours < 1.0 {
        format!("{}m", (hours * 60.0).round() as i64)
    } else if hours <= 24.0 {
        format!("{}h", hours.round() as i64)
    } else {
        format!("{}d", (hours / 24.0).round() as i64)
    }
}

/// `"5 March 2021"`
pub fn format_date_long(date: NaiveDate) -> String {
    date.format("%-d %B %Y").to_string()
}

/// `"5 Mar 2021"`
pub fn format_date_short(date: NaiveDate) -> String {
    date.format("%-d %b %Y").to_string()
}

/// Reformat a raw `YYYY-MM-DD` string as a short date, `None` when unparseable
pub fn short_date_label(raw: Option<&str>) -> Option<String> {
    raw.and_then(parse_date).map(format_date_short)
}

/// First `max_words` words of a description and whether it was cut
pub fn truncate_words(text: &str, max_words: usize) -> (String, bool) {
    let words: Vec<&str> = text.split(' ').collect();
    let short = words
        .iter()
        .take(max_words)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    (short, words.len() >= max_words)
}

/// Name with all whitespace removed (synthetic location IDs)
pub fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Serde helper: `"YYYY-MM-DD"` → `Some(date)`, anything else → `None`
pub fn de_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_str).and_then(parse_date))
}

/// Serde helper: number or numeric string → `Some(f64)`, anything else → `None`
pub fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_f64))
}

/// Numeric view of a JSON value (finite numbers and numeric strings)
pub fn value_as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
