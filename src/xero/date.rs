//! Date parsing for Xero payloads.
//!
//! The Accounting API encodes dates as `/Date(1551657600000+0000)/` while the
//! Files API uses ISO-8601 timestamps with up to seven fractional digits.
//! Values that match neither form deserialize to `None` so that a single
//! malformed record cannot fail a whole page.
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

static MS_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/Date\((-?\d+)(?:([+-])(\d{2})(\d{2}))?\)/$").expect("valid date regex")
});

/// Parse any timestamp form Xero emits.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Some(caps) = MS_DATE.captures(raw) {
        let millis: i64 = caps.get(1)?.as_str().parse().ok()?;
        let mut at = DateTime::from_timestamp_millis(millis)?.naive_utc();
        if let (Some(sign), Some(h), Some(m)) = (caps.get(2), caps.get(3), caps.get(4)) {
            let minutes = h.as_str().parse::<i64>().ok()? * 60 + m.as_str().parse::<i64>().ok()?;
            let offset = Duration::minutes(minutes);
            at = if sign.as_str() == "-" { at - offset } else { at + offset };
        }
        return Some(at);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => parse_datetime(&s),
        _ => None,
    })
}

pub fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_datetime(deserializer)?.map(|dt| dt.date()))
}
