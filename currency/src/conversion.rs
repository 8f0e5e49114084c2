use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;

/// A point-in-time table of conversion rates, keyed by base currency and
/// then quote currency. Snapshots are immutable: a refresh builds a whole
/// new `Conversions` and publishes it by swapping the shared reference.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Conversions {
    /// The "as of" date exactly as the source sent it.
    #[serde(rename = "dataAsOf", default)]
    pub data_as_of_raw: String,
    /// Parsed form of `data_as_of_raw`. None when the raw date is empty or
    /// unparsable; that is not a fetch failure.
    #[serde(skip)]
    pub data_as_of: Option<NaiveDate>,
    #[serde(default)]
    pub conversions: HashMap<String, HashMap<String, f64>>,
}

impl Conversions {
    /// Direct rate lookup. Cross-rate arithmetic is up to the caller.
    pub fn rate(&self, from: &str, to: &str) -> Option<f64> {
        self.conversions.get(from)?.get(to).copied()
    }
}

/// Parses a `YYYY-MM-DD` date, yielding None for anything else.
pub fn try_parse_date(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}
