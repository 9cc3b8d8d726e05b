//! World watcher: incremental diffs of work-unit state and output files.
//!
//! The watcher keeps the previous snapshot of every unit (keyed by
//! description) and of the work directory listing. Each `report` diffs the
//! current state against that snapshot and then replaces it, so every report
//! covers exactly one labelled step.
//!
//! Reports are advisory input for workflow-description export. A disabled
//! watcher touches nothing, and an enabled one never fails the pipeline:
//! I/O problems are logged and the report is skipped or left unwritten.

pub mod diff;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::SharedConfig;
use crate::work_unit::Batch;

pub use diff::{changed_paths, diff_maps};

/// Directory under the work directory receiving report files.
pub const OUTPUT_DIR: &str = "world2cwl";

/// Changes observed after one labelled step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldReport {
    pub step: String,
    pub timestamp: DateTime<Utc>,
    /// Paths relative to the work directory that appeared since the last snapshot
    pub new_files: Vec<PathBuf>,
    /// Sparse tree of changed unit fields, keyed by description
    pub changes: Map<String, Value>,
}

pub struct WorldWatcher {
    enabled: bool,
    /// Enablement and baseline wait for the first labelled step
    deferred: bool,
    requested_by_config: bool,
    work_dir: PathBuf,
    out_dir: PathBuf,
    files: BTreeSet<PathBuf>,
    world: Map<String, Value>,
    reports: usize,
}

impl WorldWatcher {
    pub fn new(work_dir: &Path, enabled: bool) -> Self {
        let watcher = Self {
            enabled,
            deferred: false,
            requested_by_config: false,
            work_dir: work_dir.to_path_buf(),
            out_dir: work_dir.join(OUTPUT_DIR),
            files: BTreeSet::new(),
            world: Map::new(),
            reports: 0,
        };
        if enabled {
            watcher.create_out_dir();
        }
        watcher
    }

    /// A watcher that decides whether to run after the first step.
    ///
    /// Units only carry their prepared configuration once samples are
    /// organized, so the first `report` switches the watcher on when any unit
    /// (or the shared configuration) asks for `cwl_reporting`, and takes the
    /// baseline snapshot there. The first step itself is never reported.
    pub fn deferred(work_dir: &Path, config: &SharedConfig) -> Self {
        let mut watcher = Self::new(work_dir, false);
        watcher.deferred = true;
        watcher.requested_by_config = matches!(
            config.get("algorithm").and_then(|a| a.get("cwl_reporting")),
            Some(Value::Bool(true))
        );
        watcher
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Take the baseline snapshots.
    pub fn initialize(&mut self, batches: &[Batch]) {
        if !self.enabled {
            return;
        }
        self.files = self.find_files();
        self.world = batches_to_world(batches);
        debug!(
            "World watcher baseline: {} files, {} units",
            self.files.len(),
            self.world.len()
        );
    }

    /// Diff against the previous snapshot, then make the current state the new baseline.
    pub fn report(&mut self, step: &str, batches: &[Batch]) -> Option<WorldReport> {
        if self.deferred {
            self.deferred = false;
            self.enabled = self.requested_by_config
                || batches.iter().flatten().any(|unit| unit.cwl_reporting());
            if self.enabled {
                info!("World watcher enabled after {}", step);
                self.create_out_dir();
                self.initialize(batches);
            }
            return None;
        }
        if !self.enabled {
            return None;
        }
        let files = self.find_files();
        let new_files: Vec<PathBuf> = files.difference(&self.files).cloned().collect();
        let world = batches_to_world(batches);
        let changes = diff_maps(&self.world, &world);
        self.files = files;
        self.world = world;

        let report = WorldReport {
            step: step.to_string(),
            timestamp: Utc::now(),
            new_files,
            changes,
        };
        info!(
            "World changes after {}: {} new files, {} changed fields",
            step,
            report.new_files.len(),
            changed_paths(&report.changes).len()
        );
        for path in changed_paths(&report.changes) {
            debug!("  changed: {}", path);
        }
        self.reports += 1;
        self.write_report(&report);
        Some(report)
    }

    fn create_out_dir(&self) {
        if let Err(e) = std::fs::create_dir_all(&self.out_dir) {
            warn!("Cannot create world report directory {}: {}", self.out_dir.display(), e);
        }
    }

    fn find_files(&self) -> BTreeSet<PathBuf> {
        let mut out = BTreeSet::new();
        let walker = WalkDir::new(&self.work_dir)
            .into_iter()
            .filter_entry(|entry| entry.path() != self.out_dir);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("World watcher skipped an entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.work_dir) {
                out.insert(relative.to_path_buf());
            }
        }
        out
    }

    fn write_report(&self, report: &WorldReport) {
        let name = format!("{:03}-{}.json", self.reports, file_label(&report.step));
        let path = self.out_dir.join(name);
        let json = match serde_json::to_string_pretty(report) {
            Ok(json) => json,
            Err(e) => {
                warn!("Cannot serialize world report for {}: {}", report.step, e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, json) {
            warn!("Cannot write world report {}: {}", path.display(), e);
        }
    }
}

/// Map every unit to its description. A repeated description keeps the last unit.
pub fn batches_to_world(batches: &[Batch]) -> Map<String, Value> {
    let mut world = Map::new();
    for unit in batches.iter().flatten() {
        if world
            .insert(unit.description.clone(), unit.to_value())
            .is_some()
        {
            debug!("World snapshot saw '{}' more than once", unit.description);
        }
    }
    world
}

fn file_label(step: &str) -> String {
    step.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}
