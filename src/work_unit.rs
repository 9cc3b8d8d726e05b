//! Work units and the batches they travel in.
//!
//! A `WorkUnit` has a fixed core every phase reasons about (identity, analysis
//! type, configuration overlay, resource overrides) plus one open extension
//! map for whatever the stages attach along the way.
//!
//! Between phases units travel as a list of `Batch`es. Usually each batch is a
//! singleton, but a stage may split a unit into several or merge several into
//! one, so nothing here assumes a fixed cardinality.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool name -> {parameter -> value}.
pub type Resources = BTreeMap<String, Map<String, Value>>;

/// The argument list of one stage invocation. Usually a single unit.
pub type Batch = Vec<WorkUnit>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Unique name of the unit within a run
    pub description: String,
    /// Analysis type tag selecting the pipeline variant
    pub analysis: String,
    /// Per-unit configuration overlay
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    /// Per-unit tool resource overrides
    #[serde(default)]
    pub resources: Resources,
    /// Stage-produced and descriptor-carried fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkUnit {
    pub fn new(description: impl Into<String>, analysis: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            analysis: analysis.into(),
            config: Map::new(),
            resources: Resources::new(),
            extra: Map::new(),
        }
    }

    /// Builder-style setter for an extension field.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Look up an algorithm setting, preferring the prepared configuration
    /// (`config.algorithm`) over the raw descriptor's `algorithm` block.
    pub fn algorithm(&self, key: &str) -> Option<&Value> {
        self.config
            .get("algorithm")
            .and_then(|a| a.get(key))
            .or_else(|| self.extra.get("algorithm").and_then(|a| a.get(key)))
    }

    /// Whether this unit asked for world-state reporting.
    pub fn cwl_reporting(&self) -> bool {
        matches!(self.algorithm("cwl_reporting"), Some(Value::Bool(true)))
    }

    /// The unit as a JSON value, with the extension fields inlined.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Wrap every unit as its own singleton batch.
pub fn singletons(units: impl IntoIterator<Item = WorkUnit>) -> Vec<Batch> {
    units.into_iter().map(|unit| vec![unit]).collect()
}

/// Collapse a list of batches into one batch, preserving order.
pub fn flatten(batches: Vec<Batch>) -> Batch {
    batches.into_iter().flatten().collect()
}

pub fn unit_count(batches: &[Batch]) -> usize {
    batches.iter().map(Vec::len).sum()
}

/// The first description that occurs more than once, if any.
pub fn find_duplicate(batches: &[Batch]) -> Option<&str> {
    let mut seen = HashSet::new();
    batches
        .iter()
        .flatten()
        .map(|unit| unit.description.as_str())
        .find(|description| !seen.insert(*description))
}
