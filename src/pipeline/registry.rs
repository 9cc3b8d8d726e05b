//! Name lookup from analysis type tag to pipeline variant.
//!
//! Lookup is case-insensitive. Aliases are separate entries that share an
//! implementation, so a run mixing `variant` and `variant2` samples still
//! forms two groups.

use std::collections::HashMap;
use std::sync::Arc;

use super::Pipeline;
use super::variants;
use crate::errors::ConfigError;

/// A name under which a pipeline can be selected.
#[derive(Clone)]
pub struct Registration {
    /// Name as declared, e.g. "SNP calling"
    pub name: String,
    pub pipeline: Arc<dyn Pipeline>,
}

impl Registration {
    pub fn new(name: &str, pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            name: name.to_string(),
            pipeline,
        }
    }

    /// Normalized lookup key.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn is_alias(&self) -> bool {
        self.key() != self.pipeline.name().to_lowercase()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("pipeline", &self.pipeline.name())
            .finish()
    }
}

pub struct PipelineRegistry {
    entries: Vec<Registration>,
    index: HashMap<String, usize>,
}

impl PipelineRegistry {
    /// Build a registry; two entries whose names differ only in case are rejected.
    pub fn new(entries: Vec<Registration>) -> Result<Self, ConfigError> {
        let mut index = HashMap::new();
        for (position, entry) in entries.iter().enumerate() {
            if index.insert(entry.key(), position).is_some() {
                return Err(ConfigError::DuplicatePipeline {
                    name: entry.name.clone(),
                });
            }
        }
        Ok(Self { entries, index })
    }

    /// Every variant this build ships with.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::new(variants::builtin())
    }

    pub fn resolve(&self, analysis: &str) -> Result<&Registration, ConfigError> {
        self.index
            .get(&analysis.to_lowercase())
            .map(|&position| &self.entries[position])
            .ok_or_else(|| ConfigError::UnknownAnalysis {
                analysis: analysis.to_string(),
            })
    }

    pub fn entries(&self) -> &[Registration] {
        &self.entries
    }

    /// Declared names that resolve to the pipeline called `canonical`, the canonical one excluded.
    pub fn aliases_of(&self, canonical: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.pipeline.name().eq_ignore_ascii_case(canonical) && e.is_alias())
            .map(|e| e.name.as_str())
            .collect()
    }
}
