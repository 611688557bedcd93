use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::TimeInterval;

/// Durable progress marker: the `to` of the last fully committed period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub position: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(position: DateTime<Utc>) -> Self {
        Self {
            position,
            updated_at: Utc::now(),
        }
    }

    /// Logical key of a job's checkpoint: `position_<job type>_<interval>`.
    pub fn key(job_type: &str, interval: TimeInterval) -> String {
        format!("position_{}_{}", job_type, interval)
    }
}
