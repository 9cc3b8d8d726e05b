//! Shared run configuration.
//!
//! The system configuration is a YAML document kept as an untyped mapping so
//! stages can read whatever keys they need. The orchestrator itself only looks
//! at a handful of them:
//!
//! ```yaml
//! log_dir: /data/logs          # defaults to <workdir>/log
//! resources:
//!   gatk: {cores: 4, memory: 3G}
//! stages:
//!   process_alignment:
//!     command: ./bin/align
//!     timeout_secs: 86400
//! stage_fallback: error        # or passthrough
//! cluster:
//!   launcher: "srun -p {queue} -c {cores}"
//! ```
//!
//! Pairing folds every sample's resource overrides into this mapping; after
//! that it is read-only for the rest of the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SharedConfig {
    values: Map<String, Value>,
}

impl SharedConfig {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Load the system configuration, or start empty when none is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::SystemConfigRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content).map_err(|source| ConfigError::SystemConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let values: Option<Map<String, Value>> = serde_yaml::from_str(content)?;
        Ok(Self::new(values.unwrap_or_default()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Configured parameters for one tool, e.g. `resources.gatk`.
    pub fn tool_resources(&self, tool: &str) -> Option<&Map<String, Value>> {
        self.values
            .get("resources")
            .and_then(|r| r.get(tool))
            .and_then(Value::as_object)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.values
            .get("log_dir")
            .and_then(Value::as_str)
            .map(PathBuf::from)
    }

    /// Default `log_dir` to `<work_dir>/log` unless the configuration names one.
    pub fn ensure_log_dir(&mut self, work_dir: &Path) -> PathBuf {
        if let Some(dir) = self.log_dir() {
            return dir;
        }
        let dir = work_dir.join("log");
        self.values.insert(
            "log_dir".to_string(),
            Value::String(dir.to_string_lossy().to_string()),
        );
        dir
    }

    /// Apply a sample's custom settings on top of this configuration.
    ///
    /// `resources` and `algorithm` are merged key by key: a tool or setting
    /// the sample names overwrites the same key here and leaves the others.
    pub fn update_with_custom(&mut self, custom: &Map<String, Value>) {
        for section in ["resources", "algorithm"] {
            let Some(Value::Object(incoming)) = custom.get(section) else {
                continue;
            };
            let target = self
                .values
                .entry(section.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(target) = target {
                if section == "resources" {
                    merge_resources(target, incoming);
                } else {
                    for (key, value) in incoming {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
    }

    /// Stage command table used by the local execution-context provider.
    pub fn stage_settings(&self) -> Result<StageSettings, ConfigError> {
        let stages = match self.values.get("stages") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                ConfigError::InvalidSetting {
                    key: "stages".to_string(),
                    message: e.to_string(),
                }
            })?,
        };
        let fallback = match self.values.get("stage_fallback").and_then(Value::as_str) {
            None => StageFallback::default(),
            Some(s) => s.parse()?,
        };
        Ok(StageSettings { stages, fallback })
    }

    /// Command prefix template for cluster execution, if configured.
    pub fn launcher(&self) -> Option<&str> {
        self.values
            .get("cluster")
            .and_then(|c| c.get("launcher"))
            .and_then(Value::as_str)
    }
}

fn merge_resources(target: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (tool, params) in incoming {
        let Value::Object(params) = params else {
            continue;
        };
        let entry = target
            .entry(tool.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(entry) = entry {
            for (key, value) in params {
                entry.insert(key.clone(), value.clone());
            }
        }
    }
}

/// What the local provider does with a stage that has no configured command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageFallback {
    /// Fail the step
    #[default]
    Error,
    /// Return the invocation's units unchanged
    Passthrough,
}

impl std::fmt::Display for StageFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageFallback::Error => write!(f, "error"),
            StageFallback::Passthrough => write!(f, "passthrough"),
        }
    }
}

impl std::str::FromStr for StageFallback {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(StageFallback::Error),
            "passthrough" => Ok(StageFallback::Passthrough),
            _ => Err(ConfigError::InvalidSetting {
                key: "stage_fallback".to_string(),
                message: format!("'{s}' is not one of: error, passthrough"),
            }),
        }
    }
}

/// An external command implementing one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCommand {
    pub command: String,
    #[serde(default = "default_stage_timeout")]
    pub timeout_secs: u64,
    /// Working directory, relative paths resolve against the run's work directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_stage_timeout() -> u64 {
    7 * 24 * 60 * 60
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageSettings {
    pub stages: BTreeMap<String, StageCommand>,
    pub fallback: StageFallback,
}
