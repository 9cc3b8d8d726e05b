//! Run specification parsing.
//!
//! Two document shapes are accepted:
//!
//! ```yaml
//! # bare list
//! - description: NA12878
//!   analysis: variant2
//! ```
//!
//! ```yaml
//! # mapping with details and an optional global resource overlay
//! resources:
//!   gatk: {memory: 8G}
//! details:
//!   - description: NA12878
//!     analysis: variant2
//! ```
//!
//! Anything else, including a mapping without `details`, is rejected before
//! pairing sees it.

use std::collections::HashSet;
use std::path::Path;

use serde_json::{Map, Value};

use crate::errors::RunSpecError;
use crate::work_unit::Resources;

/// A raw per-sample descriptor, as written in the document.
pub type Descriptor = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSpecification {
    /// Global tool parameter overrides
    pub resources: Resources,
    /// Raw sample descriptors in declaration order
    pub details: Vec<Descriptor>,
}

impl RunSpecification {
    /// Read and parse a run specification file.
    pub fn load(path: &Path) -> Result<Self, RunSpecError> {
        let content = std::fs::read_to_string(path).map_err(|source| RunSpecError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, RunSpecError> {
        if content.trim().is_empty() {
            return Err(RunSpecError::InvalidShape("document is empty".to_string()));
        }
        let document: Value = serde_yaml::from_str(content).map_err(RunSpecError::Parse)?;
        Self::from_value(document)
    }

    pub fn from_value(document: Value) -> Result<Self, RunSpecError> {
        let (resources, details) = match document {
            Value::Array(items) => (Resources::new(), items),
            Value::Object(mut map) => {
                let details = match map.remove("details") {
                    Some(Value::Array(items)) => items,
                    Some(_) => {
                        return Err(RunSpecError::InvalidShape(
                            "`details` must be a list of samples".to_string(),
                        ));
                    }
                    None => {
                        return Err(RunSpecError::InvalidShape(
                            "mapping document has no `details` list".to_string(),
                        ));
                    }
                };
                let resources = match map.remove("resources") {
                    None | Some(Value::Null) => Resources::new(),
                    Some(value) => parse_resources(value)?,
                };
                (resources, details)
            }
            Value::Null => {
                return Err(RunSpecError::InvalidShape("document is empty".to_string()));
            }
            _ => {
                return Err(RunSpecError::InvalidShape(
                    "expected a list of samples or a mapping with `details`".to_string(),
                ));
            }
        };

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(details.len());
        for (index, item) in details.into_iter().enumerate() {
            let descriptor = validate_descriptor(index, item)?;
            if let Some(Value::String(description)) = descriptor.get("description")
                && !seen.insert(description.clone())
            {
                return Err(RunSpecError::DuplicateDescription(description.clone()));
            }
            descriptors.push(descriptor);
        }

        Ok(Self {
            resources,
            details: descriptors,
        })
    }
}

fn parse_resources(value: Value) -> Result<Resources, RunSpecError> {
    let Value::Object(tools) = value else {
        return Err(RunSpecError::InvalidShape(
            "`resources` must map tool names to parameters".to_string(),
        ));
    };
    let mut resources = Resources::new();
    for (tool, params) in tools {
        match params {
            Value::Object(params) => {
                resources.insert(tool, params);
            }
            Value::Null => {
                resources.insert(tool, Map::new());
            }
            _ => {
                return Err(RunSpecError::InvalidShape(format!(
                    "resources for '{tool}' must be a mapping"
                )));
            }
        }
    }
    Ok(resources)
}

/// Check the fields every descriptor must carry and normalise them to strings.
fn validate_descriptor(index: usize, item: Value) -> Result<Descriptor, RunSpecError> {
    let Value::Object(mut descriptor) = item else {
        return Err(RunSpecError::NotAMapping { index });
    };
    for field in ["analysis", "description"] {
        let normalised = match descriptor.get(field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            // YAML happily reads `description: 1` as a number
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(RunSpecError::MissingField { index, field }),
        };
        descriptor.insert(field.to_string(), Value::String(normalised));
    }
    Ok(descriptor)
}
