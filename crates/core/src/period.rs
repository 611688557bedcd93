//! Half-open `[from, to)` aggregation windows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::TimeInterval;

/// One window of records to aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Inclusive start, truncated to the interval boundary.
    pub from: DateTime<Utc>,
    /// Exclusive end, `from + 1 interval`.
    pub to: DateTime<Utc>,
    /// True when `from` falls on today's UTC date, so the store may still receive records for it.
    pub is_current: bool,
    pub interval: TimeInterval,
}

impl Period {
    /// Build the window containing `start`, judged against `now`.
    pub fn starting_at(start: DateTime<Utc>, interval: TimeInterval, now: DateTime<Utc>) -> Self {
        let from = interval.truncate(start);
        Self {
            from,
            to: from + interval.length(),
            is_current: from.date_naive() == now.date_naive(),
            interval,
        }
    }

    /// True when the window starts after `now`'s window.
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.from.date_naive() > now.date_naive()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts < self.to
    }

    /// `yyyy-MM-dd` of the window start, the conventional date part of aggregation keys.
    pub fn label(&self) -> String {
        self.from.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}){}",
            self.from.to_rfc3339(),
            self.to.to_rfc3339(),
            if self.is_current { " (current)" } else { "" }
        )
    }
}
