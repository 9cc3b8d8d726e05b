//! Top-level driver: from command-line arguments to finished pipelines.
//!
//! The order matters. Everything that can be rejected cheaply (execution
//! mode, configuration, run specification, analysis types) is checked before
//! any phase runs. Temporary space lives under `<workdir>/tmp` and is removed
//! when the run ends, successfully or not.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SharedConfig;
use crate::errors::ConfigError;
use crate::logging;
use crate::pairing::{Pairing, pair};
use crate::parallel::ParallelSpec;
use crate::pipeline::{PipelineRegistry, RunContext};
use crate::provenance::{PipelineRecord, RunRecord};
use crate::run_spec::RunSpecification;
use crate::scheduler::{ContextProvider, LocalProvider};
use crate::work_unit::{Batch, unit_count};

/// Run specification looked up in the input directory when none is given.
pub const DEFAULT_RUN_SPEC: &str = "run_info.yaml";

/// Soft process limits are raised towards this value, never above the hard limit.
const MAX_PROCESS_LIMIT: u64 = 10240;

/// Named roots every phase and stage receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Directories {
    pub work: PathBuf,
    pub config: PathBuf,
    pub log: PathBuf,
    pub tmp: PathBuf,
    /// Input directory with raw sequencing files, when given
    pub fastq: Option<PathBuf>,
}

impl Directories {
    /// The default layout under a work directory. Nothing is created.
    pub fn for_work_dir(work: &Path) -> Self {
        Self {
            work: work.to_path_buf(),
            config: work.join("config"),
            log: work.join("log"),
            tmp: work.join("tmp"),
            fastq: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub work_dir: PathBuf,
    pub system_config: Option<PathBuf>,
    pub fc_dir: Option<PathBuf>,
    pub run_spec: Option<PathBuf>,
    pub mode: String,
    pub cores: usize,
    pub scheduler: Option<String>,
    pub queue: Option<String>,
    pub workflow: Option<String>,
    pub verbose: bool,
}

impl RunOptions {
    pub fn new(work_dir: impl Into<PathBuf>, run_spec: Option<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            system_config: None,
            fc_dir: None,
            run_spec,
            mode: "local".to_string(),
            cores: 1,
            scheduler: None,
            queue: None,
            workflow: None,
            verbose: false,
        }
    }
}

/// Final batches of one pipeline group.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub name: String,
    pub batches: Vec<Batch>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub outputs: Vec<PipelineOutput>,
    pub record: RunRecord,
    pub record_path: PathBuf,
}

/// Run every sample of a run specification through its pipeline.
pub async fn run_main(options: RunOptions) -> Result<RunSummary> {
    let parallel = ParallelSpec::from_args(
        &options.mode,
        options.cores,
        options.scheduler.clone(),
        options.queue.clone(),
    )?;
    let run_spec = resolve_run_spec(options.run_spec.as_deref(), options.fc_dir.as_deref())?;

    fs::create_dir_all(&options.work_dir).with_context(|| {
        format!("Failed to create work directory {}", options.work_dir.display())
    })?;
    let work = options
        .work_dir
        .canonicalize()
        .context("Failed to resolve work directory")?;

    let mut config = SharedConfig::load(options.system_config.as_deref())?;
    let log_dir = config.ensure_log_dir(&work);
    let _log_guard = logging::init_run(&log_dir, options.verbose)?;
    info!("Starting {} run in {}", parallel.mode, work.display());

    if parallel.mode.is_local() {
        setup_resources();
    }
    let dirs = setup_directories(
        &work,
        &log_dir,
        options.fc_dir.as_deref(),
        options.system_config.as_deref(),
    )?;

    let spec = RunSpecification::load(&run_spec)?;
    let registry = PipelineRegistry::builtin()?;
    let pairing = pair(spec, config, &registry)?;
    let provider = LocalProvider::from_config(&pairing.config, &parallel)?;

    execute(
        pairing,
        &run_spec,
        &parallel,
        dirs,
        &provider,
        options.workflow.clone(),
    )
    .await
}

/// Run paired groups in order through `provider` and record provenance.
pub async fn execute(
    pairing: Pairing,
    run_spec: &Path,
    parallel: &ParallelSpec,
    mut dirs: Directories,
    provider: &dyn ContextProvider,
    workflow: Option<String>,
) -> Result<RunSummary> {
    fs::create_dir_all(&dirs.tmp)
        .with_context(|| format!("Failed to create {}", dirs.tmp.display()))?;
    let scratch = tempfile::Builder::new()
        .prefix("seqforge-")
        .tempdir_in(&dirs.tmp)
        .context("Failed to create temporary directory")?;
    dirs.tmp = scratch.path().to_path_buf();
    debug!("Temporary files go to {}", dirs.tmp.display());

    let mut record = RunRecord::new(parallel.mode, parallel.cores, workflow, run_spec);
    let mut outputs = Vec::with_capacity(pairing.groups.len());
    for group in pairing.groups {
        let name = group.registration.name.clone();
        let pipeline = Arc::clone(&group.registration.pipeline);
        let units_in = unit_count(&group.batches);
        info!("Running {} pipeline on {} samples", name, units_in);

        let mut ctx = RunContext::new(&pairing.config, run_spec, parallel, &dirs, provider);
        let batches = pipeline
            .run(&mut ctx, group.batches)
            .await
            .with_context(|| format!("Pipeline {name} failed"))?;

        record.pipelines.push(PipelineRecord {
            name: name.clone(),
            pipeline: pipeline.name().to_string(),
            units_in,
            units_out: unit_count(&batches),
            phases: ctx.phases,
        });
        outputs.push(PipelineOutput { name, batches });
    }

    record.finish();
    let record_path = record.save(&dirs.work)?;
    if let Err(e) = scratch.close() {
        warn!("Failed to remove temporary directory: {}", e);
    }
    Ok(RunSummary {
        outputs,
        record,
        record_path,
    })
}

/// An explicit run specification, or the default one in the input directory.
pub fn resolve_run_spec(run_spec: Option<&Path>, fc_dir: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = run_spec {
        return Ok(path.to_path_buf());
    }
    fc_dir
        .map(|dir| dir.join(DEFAULT_RUN_SPEC))
        .filter(|path| path.is_file())
        .ok_or(ConfigError::MissingRunSpec)
}

/// Create the run's directory layout and keep a copy of the system configuration.
pub fn setup_directories(
    work: &Path,
    log_dir: &Path,
    fc_dir: Option<&Path>,
    system_config: Option<&Path>,
) -> Result<Directories> {
    let mut dirs = Directories::for_work_dir(work);
    dirs.log = log_dir.to_path_buf();
    dirs.fastq = fc_dir.map(Path::to_path_buf);
    for dir in [&dirs.config, &dirs.log, &dirs.tmp] {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    if let Some(source) = system_config
        && let Some(name) = source.file_name()
    {
        let target = dirs.config.join(name);
        let same = fs::canonicalize(source).ok() == fs::canonicalize(&target).ok();
        if !same {
            fs::copy(source, &target).with_context(|| {
                format!("Failed to copy {} to {}", source.display(), target.display())
            })?;
        }
    }
    Ok(dirs)
}

/// Raise soft process and open-file limits for local runs.
#[cfg(unix)]
pub fn setup_resources() {
    raise_limit("processes", libc::RLIMIT_NPROC as RlimitResource);
    raise_limit("open files", libc::RLIMIT_NOFILE as RlimitResource);
}

#[cfg(not(unix))]
pub fn setup_resources() {}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type RlimitResource = libc::c_int;

#[cfg(unix)]
fn raise_limit(name: &str, resource: RlimitResource) {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct it is given.
    if unsafe { libc::getrlimit(resource, &mut limit) } != 0 {
        warn!(
            "Cannot read {} limit: {}",
            name,
            std::io::Error::last_os_error()
        );
        return;
    }
    let Some(target) = target_limit(limit.rlim_cur as u64, limit.rlim_max as u64) else {
        return;
    };
    let raised = libc::rlimit {
        rlim_cur: target as libc::rlim_t,
        rlim_max: limit.rlim_max,
    };
    // SAFETY: setrlimit only reads the struct it is given.
    if unsafe { libc::setrlimit(resource, &raised) } != 0 {
        warn!(
            "Cannot raise {} limit to {}: {}",
            name,
            target,
            std::io::Error::last_os_error()
        );
    } else {
        debug!("Raised {} limit from {} to {}", name, limit.rlim_cur, target);
    }
}

/// New soft limit, or `None` when the current one is already high enough.
pub fn target_limit(soft: u64, hard: u64) -> Option<u64> {
    let target = hard.min(MAX_PROCESS_LIMIT);
    (soft < target).then_some(target)
}
