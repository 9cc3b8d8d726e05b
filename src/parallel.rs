//! Execution mode selection and its startup validation.
//!
//! `local` and `clusterk` run on the current machine; `ipython` hands stages to
//! a cluster scheduler and therefore needs to know which one, and which queue.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// The one scheduler that may run without an explicit queue.
const QUEUELESS_SCHEDULER: &str = "sge";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    Clusterk,
    Ipython,
}

impl ExecutionMode {
    /// Whether this mode runs on the current machine.
    pub fn is_local(&self) -> bool {
        matches!(self, ExecutionMode::Local | ExecutionMode::Clusterk)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Clusterk => write!(f, "clusterk"),
            ExecutionMode::Ipython => write!(f, "ipython"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(ExecutionMode::Local),
            "clusterk" => Ok(ExecutionMode::Clusterk),
            "ipython" => Ok(ExecutionMode::Ipython),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// How the run is parallelised, as requested on the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelSpec {
    pub mode: ExecutionMode,
    /// Total cores available to the run
    pub cores: usize,
    pub scheduler: Option<String>,
    pub queue: Option<String>,
}

impl ParallelSpec {
    pub fn local(cores: usize) -> Self {
        Self {
            mode: ExecutionMode::Local,
            cores: cores.max(1),
            scheduler: None,
            queue: None,
        }
    }

    /// Build and validate a spec from raw command-line values.
    pub fn from_args(
        mode: &str,
        cores: usize,
        scheduler: Option<String>,
        queue: Option<String>,
    ) -> Result<Self, ConfigError> {
        Self {
            mode: mode.parse()?,
            cores: cores.max(1),
            scheduler,
            queue,
        }
        .validate()
    }

    /// Check cluster requirements. An `sge` run without a queue gets an empty one.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.mode != ExecutionMode::Ipython {
            return Ok(self);
        }
        let scheduler = match self.scheduler.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return Err(ConfigError::MissingScheduler),
        };
        if scheduler != QUEUELESS_SCHEDULER {
            if self.queue.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingQueue { scheduler });
            }
        } else if self.queue.is_none() {
            self.queue = Some(String::new());
        }
        Ok(self)
    }
}
