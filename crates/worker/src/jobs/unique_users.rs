//! `parameters_by_unique_users`: distinct users per search parameter per day.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{JobSettings, ResultEntry, ResultMap};
use tally_job::{JobDefinition, JobError};

pub const JOB_NAME: &str = "parameters_by_unique_users";

/// One search as logged by the frontend.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchEvent {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub parameters: Vec<String>,
    pub user: String,
}

/// Persisted row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterUsers {
    #[serde(rename = "@timestamp")]
    pub date: NaiveDate,
    pub parameter: String,
    pub unique_users: usize,
}

/// Users seen for a parameter so far. Never persisted.
pub type UserNames = BTreeSet<String>;

pub type UniqueUsersMap = ResultMap<ParameterUsers, UserNames>;

fn row_key(parameter: &str, date: NaiveDate) -> String {
    format!("{}_{}", parameter, date.format("%Y-%m-%d"))
}

pub fn reduce(event: &SearchEvent, local: &mut UniqueUsersMap) -> anyhow::Result<()> {
    let date = event.timestamp.date_naive();
    for parameter in &event.parameters {
        let entry = local.entry(row_key(parameter, date)).or_insert_with(|| {
            ResultEntry::new(
                ParameterUsers {
                    date,
                    parameter: parameter.clone(),
                    unique_users: 0,
                },
                UserNames::new(),
            )
        });
        if entry.helper.insert(event.user.clone()) {
            entry.output.unique_users = entry.helper.len();
        }
    }
    Ok(())
}

pub fn combine(global: &mut UniqueUsersMap, local: UniqueUsersMap) -> anyhow::Result<()> {
    for (key, entry) in local {
        match global.get_mut(&key) {
            Some(existing) => {
                existing.helper.extend(entry.helper);
                existing.output.unique_users = existing.helper.len();
            }
            None => {
                global.insert(key, entry);
            }
        }
    }
    Ok(())
}

pub fn definition(
    settings: JobSettings,
) -> Result<JobDefinition<SearchEvent, ParameterUsers, UserNames>, JobError> {
    JobDefinition::builder(JOB_NAME)
        .with_settings(settings)
        .reduce_with(reduce)
        .combine_into(combine)
        .build()
}
