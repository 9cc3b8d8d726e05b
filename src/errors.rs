//! Typed error hierarchy for the seqforge orchestrator.
//!
//! The enums follow the lifetime of a run:
//! - `ConfigError`: startup failures, nothing has been processed yet
//! - `RunSpecError`: the run specification document is malformed
//! - `PairingError`: either of the above, raised while grouping samples
//! - `StageError`: a single scheduler invocation failed
//! - `PhaseError`: a resource-scoped phase failed, carrying where it failed

use std::path::PathBuf;

use thiserror::Error;

/// Fatal startup errors, reported before any phase runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Cannot determine which type of analysis to run for '{analysis}'; set a known `analysis` under details"
    )]
    UnknownAnalysis { analysis: String },

    #[error("Pipeline name '{name}' is registered more than once")]
    DuplicatePipeline { name: String },

    #[error("Unexpected type of parallel run: {0}")]
    UnknownMode(String),

    #[error("Cluster parallel runs require a specified scheduler (-s)")]
    MissingScheduler,

    #[error("Cluster parallel runs with scheduler '{scheduler}' require a specified queue (-q)")]
    MissingQueue { scheduler: String },

    #[error("Cluster parallel runs require `cluster.launcher` in the system configuration")]
    MissingLauncher,

    #[error("No run specification given and none found in the input directory")]
    MissingRunSpec,

    #[error("Invalid `{key}` setting in system configuration: {message}")]
    InvalidSetting { key: String, message: String },

    #[error("Failed to read system configuration at {path}: {source}")]
    SystemConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse system configuration at {path}: {source}")]
    SystemConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The run specification could not be turned into work units.
#[derive(Debug, Error)]
pub enum RunSpecError {
    #[error("Failed to read run specification at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse run specification: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("Invalid run specification: {0}")]
    InvalidShape(String),

    #[error("Sample {index} in details is not a mapping")]
    NotAMapping { index: usize },

    #[error("Sample {index} in details is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Sample description '{0}' appears more than once")]
    DuplicateDescription(String),
}

/// Pairing stops at the first descriptor it cannot route.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    RunSpec(#[from] RunSpecError),
}

/// A single stage invocation failed inside the scheduler capability.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("No implementation configured for stage '{0}'")]
    UnknownStage(String),

    #[error("Failed to spawn stage command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Stage command exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Stage produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("Stage task was aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures of a resource-scoped phase. Labels identify which context failed.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Phase '{phase}' could not open its execution context: {source}")]
    Context {
        phase: String,
        #[source]
        source: StageError,
    },

    #[error("Phase '{phase}' failed in '{section}' at stage '{stage}': {source}")]
    Step {
        phase: String,
        section: String,
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Phase '{phase}' finished with duplicate work unit '{description}'")]
    DuplicateIdentity { phase: String, description: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_analysis_names_the_type() {
        let err = ConfigError::UnknownAnalysis {
            analysis: "wgs-magic".to_string(),
        };
        assert!(err.to_string().contains("wgs-magic"));
    }

    #[test]
    fn missing_queue_names_the_scheduler() {
        let err = ConfigError::MissingQueue {
            scheduler: "slurm".to_string(),
        };
        assert!(err.to_string().contains("slurm"));
        assert!(err.to_string().contains("-q"));
    }

    #[test]
    fn step_error_carries_phase_and_stage() {
        let err = PhaseError::Step {
            phase: "alignment".to_string(),
            section: "alignment".to_string(),
            stage: "process_alignment".to_string(),
            source: StageError::NonZeroExit {
                code: 2,
                stderr: "bwa: not found".to_string(),
            },
        };
        let message = err.to_string();
        assert!(message.contains("alignment"));
        assert!(message.contains("process_alignment"));
        assert!(message.contains("bwa: not found"));
    }

    #[test]
    fn step_error_exposes_stage_source() {
        use std::error::Error as _;
        let err = PhaseError::Step {
            phase: "qc".to_string(),
            section: "quality control".to_string(),
            stage: "qc".to_string(),
            source: StageError::Timeout { secs: 5 },
        };
        let source = err.source().expect("source");
        assert!(source.to_string().contains("5 seconds"));
    }

    #[test]
    fn missing_field_is_matchable() {
        let err = RunSpecError::MissingField {
            index: 3,
            field: "analysis",
        };
        match &err {
            RunSpecError::MissingField { index, field } => {
                assert_eq!(*index, 3);
                assert_eq!(*field, "analysis");
            }
            _ => panic!("Expected MissingField"),
        }
    }

    #[test]
    fn stage_error_converts_from_anyhow() {
        let err: StageError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, StageError::Other(_)));
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ConfigError::MissingScheduler);
        assert_std_error(&RunSpecError::InvalidShape("x".into()));
        assert_std_error(&StageError::UnknownStage("x".into()));
        assert_std_error(&PhaseError::DuplicateIdentity {
            phase: "p".into(),
            description: "d".into(),
        });
    }
}
