//! Per-job settings: where records come from, where rows go, and how far back to start.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::CoreError;
use crate::period::Period;

/// Default index rows are written to when no format is configured.
pub const DEFAULT_INDEX_NAME_FORMAT: &str = "tally-reductions";
/// Default index pattern records are read from.
pub const DEFAULT_SOURCE_INDEX: &str = "logstash-*";
/// Default timestamp field of input records.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "@timestamp";
/// Days looked back when neither a checkpoint nor a start date exists.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

// ── Time interval ─────────────────────────────────────────────

/// Window granularity. Only calendar days are supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInterval {
    #[default]
    Day,
}

impl TimeInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInterval::Day => "day",
        }
    }

    /// Length of one window.
    pub fn length(&self) -> Duration {
        match self {
            TimeInterval::Day => Duration::days(1),
        }
    }

    /// Truncate a timestamp down to the start of its window.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeInterval::Day => ts.date_naive().and_time(NaiveTime::MIN).and_utc(),
        }
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeInterval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "days" | "daily" => Ok(TimeInterval::Day),
            other => Err(CoreError::UnsupportedInterval(other.to_string())),
        }
    }
}

// ── TTL ───────────────────────────────────────────────────────

/// Retention for written rows, parsed from strings like `30d`, `12h`, `90m`, `45s`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ttl {
    raw: String,
    duration: Duration,
}

impl Ttl {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Ttl {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = || CoreError::InvalidTtl(s.to_string());

        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (amount, unit) = raw.split_at(split);
        let amount: i64 = amount.parse().map_err(|_| invalid())?;
        if amount <= 0 {
            return Err(invalid());
        }

        let duration = match unit {
            "s" => Duration::seconds(amount),
            "m" => Duration::minutes(amount),
            "h" => Duration::hours(amount),
            "d" => Duration::days(amount),
            _ => return Err(invalid()),
        };

        Ok(Self {
            raw: raw.to_string(),
            duration,
        })
    }
}

impl TryFrom<String> for Ttl {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ttl> for String {
    fn from(ttl: Ttl) -> Self {
        ttl.raw
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ── Job settings ──────────────────────────────────────────────

/// Settings for one job definition.
///
/// Plain value object; the defaults mirror the store defaults in [`StoreConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    /// Document store host.
    pub host: String,
    /// Document store port.
    pub port: u16,
    /// Window granularity.
    pub time_interval: TimeInterval,
    /// Output index name; `strftime` specifiers are rendered against the period start.
    pub index_name_format: String,
    /// Where to begin when no checkpoint exists. `None` = now - 30 days.
    pub start_date: Option<DateTime<Utc>>,
    /// Max pooled connections to the document store.
    pub connection_limit: usize,
    /// Optional retention for written rows.
    pub ttl: Option<Ttl>,
    /// Index pattern input records are read from.
    pub source_index: String,
    /// Timestamp field the window range query runs against.
    pub timestamp_field: String,
    /// Optional document type filter applied to the range query.
    pub record_type: Option<String>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9200,
            time_interval: TimeInterval::Day,
            index_name_format: DEFAULT_INDEX_NAME_FORMAT.to_string(),
            start_date: None,
            connection_limit: 5,
            ttl: None,
            source_index: DEFAULT_SOURCE_INDEX.to_string(),
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
            record_type: None,
        }
    }
}

impl JobSettings {
    /// Settings seeded from the process-wide store config.
    pub fn from_config(store: &StoreConfig) -> Self {
        Self {
            host: store.host.clone(),
            port: store.port,
            connection_limit: store.connection_limit,
            ..Self::default()
        }
    }

    /// Base URL of the document store (`http://host:port` unless a scheme is given).
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    /// Start date used when no checkpoint is stored.
    pub fn effective_start_date(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.start_date
            .unwrap_or_else(|| now - Duration::days(DEFAULT_LOOKBACK_DAYS))
    }

    /// Render the output index name for a period, lowercased since the
    /// store rejects uppercase index names.
    pub fn output_index(&self, period: &Period) -> String {
        if !self.index_name_format.contains('%') {
            return self.index_name_format.to_lowercase();
        }
        let mut rendered = String::new();
        match write!(rendered, "{}", period.from.format(&self.index_name_format)) {
            Ok(()) => rendered.to_lowercase(),
            Err(_) => self.index_name_format.to_lowercase(),
        }
    }

    /// Check every field that would otherwise fail at run time.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.host.trim().is_empty() {
            return Err(invalid("host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port", "must be non-zero"));
        }
        if self.connection_limit == 0 {
            return Err(invalid("connection_limit", "must be at least 1"));
        }
        if self.source_index.trim().is_empty() {
            return Err(invalid("source_index", "must not be empty"));
        }
        if self.timestamp_field.trim().is_empty() {
            return Err(invalid("timestamp_field", "must not be empty"));
        }
        if self.index_name_format.trim().is_empty() {
            return Err(invalid("index_name_format", "must not be empty"));
        }
        if StrftimeItems::new(&self.index_name_format).any(|item| matches!(item, Item::Error)) {
            return Err(invalid("index_name_format", "contains an invalid strftime specifier"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> CoreError {
    CoreError::InvalidSetting {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_match_store_defaults() {
        let s = JobSettings::default();
        assert_eq!(s.host, "localhost");
        assert_eq!(s.port, 9200);
        assert_eq!(s.connection_limit, 5);
        assert_eq!(s.time_interval, TimeInterval::Day);
        assert!(s.start_date.is_none());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn truncate_to_midnight() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 17, 42, 9).unwrap();
        let day = TimeInterval::Day.truncate(ts);
        assert_eq!(day, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn interval_parses_aliases() {
        assert_eq!("Day".parse::<TimeInterval>().unwrap(), TimeInterval::Day);
        assert_eq!("daily".parse::<TimeInterval>().unwrap(), TimeInterval::Day);
        assert!("hour".parse::<TimeInterval>().is_err());
    }

    #[test]
    fn ttl_parsing() {
        assert_eq!("30d".parse::<Ttl>().unwrap().duration(), Duration::days(30));
        assert_eq!("12h".parse::<Ttl>().unwrap().duration(), Duration::hours(12));
        assert_eq!("90m".parse::<Ttl>().unwrap().duration(), Duration::minutes(90));
        assert!("".parse::<Ttl>().is_err());
        assert!("d".parse::<Ttl>().is_err());
        assert!("0d".parse::<Ttl>().is_err());
        assert!("10w".parse::<Ttl>().is_err());
    }

    #[test]
    fn output_index_renders_period_date() {
        let settings = JobSettings {
            index_name_format: "tally-%Y.%m".to_string(),
            ..JobSettings::default()
        };
        let period = Period::starting_at(
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            TimeInterval::Day,
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        );
        assert_eq!(settings.output_index(&period), "tally-2024.01");

        let fixed = JobSettings::default();
        assert_eq!(fixed.output_index(&period), DEFAULT_INDEX_NAME_FORMAT);
    }

    #[test]
    fn output_index_is_lowercased_without_specifiers() {
        let period = Period::starting_at(
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            TimeInterval::Day,
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        );
        let fixed = JobSettings {
            index_name_format: "LogFlowReducer".to_string(),
            ..JobSettings::default()
        };
        assert_eq!(fixed.output_index(&period), "logflowreducer");

        let dated = JobSettings {
            index_name_format: "LogFlow-%Y.%m.%d".to_string(),
            ..JobSettings::default()
        };
        assert_eq!(dated.output_index(&period), "logflow-2024.01.15");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut s = JobSettings::default();
        s.host = " ".to_string();
        assert!(s.validate().is_err());

        let mut s = JobSettings::default();
        s.connection_limit = 0;
        assert!(s.validate().is_err());

        let mut s = JobSettings::default();
        s.index_name_format = "tally-%Q".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn base_url_keeps_explicit_scheme() {
        let mut s = JobSettings::default();
        assert_eq!(s.base_url(), "http://localhost:9200");
        s.host = "https://search.internal".to_string();
        assert_eq!(s.base_url(), "https://search.internal:9200");
    }
}
