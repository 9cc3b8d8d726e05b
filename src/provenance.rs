//! Run provenance records.
//!
//! Every run leaves a JSON record under `<workdir>/provenance/` describing
//! which pipelines ran, how each phase was sized and how long it took.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::parallel::ExecutionMode;

/// Directory under the work directory receiving run records.
pub const PROVENANCE_DIR: &str = "provenance";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub mode: ExecutionMode,
    pub cores: usize,
    pub workflow: Option<String>,
    pub run_spec: PathBuf,
    pub pipelines: Vec<PipelineRecord>,
}

impl RunRecord {
    pub fn new(mode: ExecutionMode, cores: usize, workflow: Option<String>, run_spec: &Path) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            mode,
            cores,
            workflow,
            run_spec: run_spec.to_path_buf(),
            pipelines: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Write the record to `<work_dir>/provenance/run-<timestamp>_<id>.json`.
    pub fn save(&self, work_dir: &Path) -> Result<PathBuf> {
        let dir = work_dir.join(PROVENANCE_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let filename = format!(
            "run-{}_{}.json",
            self.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &self.run_id.to_string()[..8]
        );
        let path = dir.join(filename);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run record")?;
        fs::write(&path, json).context("Failed to write run record")?;
        Ok(path)
    }
}

/// One pipeline group of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRecord {
    /// Registered name the group was resolved through
    pub name: String,
    /// Canonical pipeline behind that name
    pub pipeline: String,
    pub units_in: usize,
    pub units_out: usize,
    pub phases: Vec<PhaseRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub label: String,
    pub context_class: String,
    pub multiplier: u32,
    pub units_in: usize,
    pub units_out: usize,
    pub duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn saved_record_reads_back() {
        let dir = tempdir().unwrap();
        let mut record = RunRecord::new(ExecutionMode::Local, 4, None, Path::new("run.yaml"));
        record.pipelines.push(PipelineRecord {
            name: "SNP calling".into(),
            pipeline: "variant2".into(),
            units_in: 2,
            units_out: 2,
            phases: vec![PhaseRecord {
                label: "alignment".into(),
                context_class: "multicore".into(),
                multiplier: 3,
                units_in: 2,
                units_out: 2,
                duration_secs: 0.5,
            }],
        });
        record.finish();

        let path = record.save(dir.path()).unwrap();
        assert!(path.starts_with(dir.path().join(PROVENANCE_DIR)));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("run-") && name.ends_with(".json"));

        let loaded: RunRecord =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, record.run_id);
        assert!(loaded.ended_at.is_some());
        assert_eq!(loaded.pipelines[0].phases[0].multiplier, 3);
    }
}
