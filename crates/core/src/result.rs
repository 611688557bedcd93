use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One aggregate row under construction.
///
/// `output` is what gets persisted. `helper` is merge-time accumulator state
/// (for example the set of distinct ids behind a count) and is never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry<O, H> {
    pub output: O,
    pub helper: H,
}

impl<O, H> ResultEntry<O, H> {
    pub fn new(output: O, helper: H) -> Self {
        Self { output, helper }
    }
}

/// Aggregation key -> entry. Keys are unique; iteration order carries no meaning.
pub type ResultMap<O, H> = HashMap<String, ResultEntry<O, H>>;
