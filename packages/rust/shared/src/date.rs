//! Decoder for the remote system's date values.
//!
//! Dates come back either as a bare digit string (milliseconds since the
//! epoch) or wrapped as `/Date(<13-digit-ms>)/`. Both forms are the same
//! instant; ordering compares the millisecond counter.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;

/// A decoded remote date. `ms` is `None` when the raw value was not in
/// either accepted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EsupDate {
    ms: Option<i64>,
}

impl EsupDate {
    /// Decode a raw field value.
    pub fn decode(raw: &Value) -> Self {
        let ms = match raw {
            Value::String(s) => decode_str(s),
            Value::Number(n) => n.as_i64(),
            _ => None,
        };
        Self { ms }
    }

    pub fn from_millis(ms: i64) -> Self {
        Self { ms: Some(ms) }
    }

    pub fn millis(&self) -> Option<i64> {
        self.ms
    }

    /// The decoded instant, or 2000-01-01 when the value was undecodable.
    pub fn datetime(&self) -> DateTime<Utc> {
        self.ms
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(|| Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap())
    }

    /// Re-encode in the remote wrapper form.
    pub fn wire(&self) -> Option<String> {
        self.ms.map(|ms| format!("/Date({ms})/"))
    }
}

fn decode_str(s: &str) -> Option<i64> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().ok();
    }

    let wrapper = Regex::new(r"/Date\(([0-9]{13})\)/").expect("wrapper pattern");
    wrapper
        .captures(s)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
