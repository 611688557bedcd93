//! Declarative job definitions: a name, settings, and one reduce/combine pair.

use std::fmt;
use std::sync::Arc;

use tally_aggregate::{Combiner, Reducer};
use tally_core::{Checkpoint, JobSettings};

use crate::error::JobError;

/// Immutable definition of one reduction job.
///
/// `I` is the input record decoded from the store, `O` the persisted row and
/// `H` the merge-time helper state.
pub struct JobDefinition<I, O, H> {
    name: String,
    settings: JobSettings,
    reducer: Arc<dyn Reducer<I, O, H>>,
    combiner: Arc<dyn Combiner<O, H>>,
}

impl<I, O, H> JobDefinition<I, O, H> {
    pub fn builder(name: impl Into<String>) -> JobDefinitionBuilder<I, O, H> {
        JobDefinitionBuilder::new(name)
    }

    /// Job type name used in checkpoint keys and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn reducer(&self) -> Arc<dyn Reducer<I, O, H>> {
        Arc::clone(&self.reducer)
    }

    pub fn combiner(&self) -> Arc<dyn Combiner<O, H>> {
        Arc::clone(&self.combiner)
    }

    /// Logical checkpoint key of this job.
    pub fn checkpoint_key(&self) -> String {
        Checkpoint::key(&self.name, self.settings.time_interval)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        validate_name(&self.name)?;
        self.settings.validate()?;
        Ok(())
    }
}

impl<I, O, H> fmt::Debug for JobDefinition<I, O, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> Result<(), JobError> {
    if name.is_empty() {
        return Err(JobError::Invalid("job name must not be empty".into()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(JobError::Invalid(format!(
            "job name '{name}' may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

/// Builder for [`JobDefinition`]. Building never starts any work.
pub struct JobDefinitionBuilder<I, O, H> {
    name: String,
    settings: JobSettings,
    reducer: Option<Arc<dyn Reducer<I, O, H>>>,
    combiner: Option<Arc<dyn Combiner<O, H>>>,
}

impl<I, O, H> JobDefinitionBuilder<I, O, H> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: JobSettings::default(),
            reducer: None,
            combiner: None,
        }
    }

    /// Replace the settings wholesale.
    pub fn with_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Adjust the current settings in place.
    pub fn settings(mut self, configure: impl FnOnce(&mut JobSettings)) -> Self {
        configure(&mut self.settings);
        self
    }

    pub fn reduce_with(mut self, reducer: impl Reducer<I, O, H> + 'static) -> Self {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    pub fn combine_into(mut self, combiner: impl Combiner<O, H> + 'static) -> Self {
        self.combiner = Some(Arc::new(combiner));
        self
    }

    /// Check everything `build` would reject, without consuming the builder.
    pub fn validate(&self) -> Result<(), JobError> {
        validate_name(&self.name)?;
        self.settings.validate()?;
        if self.reducer.is_none() {
            return Err(JobError::Invalid(format!("job '{}' has no reduce function", self.name)));
        }
        if self.combiner.is_none() {
            return Err(JobError::Invalid(format!("job '{}' has no combine function", self.name)));
        }
        Ok(())
    }

    pub fn build(self) -> Result<JobDefinition<I, O, H>, JobError> {
        self.validate()?;
        match (self.reducer, self.combiner) {
            (Some(reducer), Some(combiner)) => Ok(JobDefinition {
                name: self.name,
                settings: self.settings,
                reducer,
                combiner,
            }),
            _ => Err(JobError::Invalid("reduce and combine functions are required".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use tally_core::{ResultMap, TimeInterval};

    use super::*;

    type Map = ResultMap<u64, ()>;

    fn count(_: &String, local: &mut Map) -> anyhow::Result<()> {
        local.entry("all".into()).or_insert_with(|| tally_core::ResultEntry::new(0, ())).output += 1;
        Ok(())
    }

    fn sum(global: &mut Map, local: Map) -> anyhow::Result<()> {
        for (k, v) in local {
            global.entry(k).or_insert_with(|| tally_core::ResultEntry::new(0, ())).output += v.output;
        }
        Ok(())
    }

    #[test]
    fn builds_with_defaults() {
        let def = JobDefinition::<String, u64, ()>::builder("count_all")
            .reduce_with(count)
            .combine_into(sum)
            .build()
            .unwrap();
        assert_eq!(def.name(), "count_all");
        assert_eq!(def.settings().port, 9200);
        assert_eq!(def.settings().time_interval, TimeInterval::Day);
        assert_eq!(def.checkpoint_key(), "position_count_all_day");
    }

    #[test]
    fn settings_closure_applies() {
        let def = JobDefinition::<String, u64, ()>::builder("count_all")
            .settings(|s| {
                s.host = "search.internal".into();
                s.index_name_format = "counts-%Y.%m".into();
            })
            .reduce_with(count)
            .combine_into(sum)
            .build()
            .unwrap();
        assert_eq!(def.settings().host, "search.internal");
        assert_eq!(def.settings().index_name_format, "counts-%Y.%m");
    }

    #[test]
    fn missing_functions_are_rejected() {
        let err = JobDefinition::<String, u64, ()>::builder("count_all")
            .reduce_with(count)
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::Invalid(_)));

        let err = JobDefinition::<String, u64, ()>::builder("count_all")
            .combine_into(sum)
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::Invalid(_)));
    }

    #[test]
    fn bad_name_or_settings_are_rejected() {
        let err = JobDefinition::<String, u64, ()>::builder("has space")
            .reduce_with(count)
            .combine_into(sum)
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::Invalid(_)));

        let err = JobDefinition::<String, u64, ()>::builder("count_all")
            .settings(|s| s.connection_limit = 0)
            .reduce_with(count)
            .combine_into(sum)
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::Settings(_)));
    }
}
