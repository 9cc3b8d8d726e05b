//! Stage implementations for the local execution-context provider.
//!
//! Stages are opaque to the orchestrator. Locally they are either external
//! commands configured under `stages:` or a passthrough that hands units back
//! unchanged.
//!
//! Command stages follow a small protocol:
//! - the command runs through `sh -c` in the work directory
//! - a JSON request (stage, phase, sizing, units, config, dirs) arrives on stdin
//! - stdout is a JSON list of batches, or a flat list of units (each becomes
//!   its own batch); empty stdout means "units unchanged"
//! - any non-zero exit fails the invocation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{SharedConfig, StageCommand, StageFallback, StageSettings};
use crate::driver::Directories;
use crate::errors::StageError;
use crate::resources::ContextSizing;
use crate::work_unit::{Batch, WorkUnit, singletons};

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// What every invocation inside one open context shares.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub phase: String,
    pub context_class: String,
    pub sizing: ContextSizing,
    pub config: SharedConfig,
    pub dirs: Directories,
    pub run_spec: PathBuf,
    /// Rendered cluster launcher prefix, when running under a cluster scheduler
    #[serde(skip)]
    pub launcher: Option<String>,
}

#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(
        &self,
        stage: &str,
        args: Batch,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Batch>, StageError>;
}

/// Hands the invocation's units back, one batch per unit.
pub struct PassthroughStage;

#[async_trait]
impl Stage for PassthroughStage {
    async fn run(
        &self,
        stage: &str,
        args: Batch,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<Batch>, StageError> {
        debug!("Passthrough for stage {} ({} units)", stage, args.len());
        Ok(singletons(args))
    }
}

#[derive(Serialize)]
struct StageRequest<'a> {
    stage: &'a str,
    phase: &'a str,
    context_class: &'a str,
    sizing: &'a ContextSizing,
    units: &'a [WorkUnit],
    config: &'a SharedConfig,
    dirs: &'a Directories,
    run_spec: &'a Path,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StageOutput {
    Batches(Vec<Batch>),
    Units(Vec<WorkUnit>),
}

/// Runs an external command per invocation.
pub struct CommandStage {
    spec: StageCommand,
}

impl CommandStage {
    pub fn new(spec: StageCommand) -> Self {
        Self { spec }
    }

    fn working_dir(&self, ctx: &ExecutionContext) -> PathBuf {
        match &self.spec.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => ctx.dirs.work.join(dir),
            None => ctx.dirs.work.clone(),
        }
    }

    fn shell_command(&self, ctx: &ExecutionContext) -> String {
        match &ctx.launcher {
            Some(prefix) => format!("{} {}", prefix, self.spec.command),
            None => self.spec.command.clone(),
        }
    }
}

#[async_trait]
impl Stage for CommandStage {
    async fn run(
        &self,
        stage: &str,
        args: Batch,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Batch>, StageError> {
        let command = self.shell_command(ctx);
        let request = StageRequest {
            stage,
            phase: &ctx.phase,
            context_class: &ctx.context_class,
            sizing: &ctx.sizing,
            units: &args,
            config: &ctx.config,
            dirs: &ctx.dirs,
            run_spec: &ctx.run_spec,
        };
        let request = serde_json::to_vec(&request)
            .map_err(|e| StageError::Other(anyhow::anyhow!("Failed to encode request: {e}")))?;

        debug!(
            "Running stage {} ({} units): {}",
            stage,
            args.len(),
            command
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(self.working_dir(ctx))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("SEQFORGE_STAGE", stage)
            .env("SEQFORGE_PHASE", &ctx.phase)
            .env("SEQFORGE_CONTEXT", &ctx.context_class)
            .env("SEQFORGE_CORES", ctx.sizing.cores_per_job.to_string())
            .env(
                "SEQFORGE_MEMORY_GB",
                ctx.sizing.memory_gb.map(|gb| gb.to_string()).unwrap_or_default(),
            )
            .env("SEQFORGE_WORK_DIR", &ctx.dirs.work)
            .env("SEQFORGE_TMP_DIR", &ctx.dirs.tmp)
            .spawn()
            .map_err(|source| StageError::Spawn {
                command: command.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that never reads stdin closes the pipe early; that is fine.
            if let Err(e) = stdin.write_all(&request).await {
                debug!("Stage {} did not read its request: {}", stage, e);
            }
        }

        let secs = self.spec.timeout_secs;
        let output = match timeout(Duration::from_secs(secs), child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| StageError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => return Err(StageError::Timeout { secs }),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("Stage {} stderr: {}", stage, stderr.trim());
        }
        if !output.status.success() {
            return Err(StageError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            });
        }

        parse_output(&output.stdout, args)
    }
}

fn parse_output(stdout: &[u8], args: Batch) -> Result<Vec<Batch>, StageError> {
    let stdout = String::from_utf8_lossy(stdout);
    if stdout.trim().is_empty() {
        return Ok(singletons(args));
    }
    match serde_json::from_str::<StageOutput>(stdout.trim()) {
        Ok(StageOutput::Batches(batches)) => Ok(batches),
        Ok(StageOutput::Units(units)) => Ok(singletons(units)),
        Err(e) => Err(StageError::InvalidOutput(format!(
            "expected a JSON list of units or batches ({e})"
        ))),
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Stage name to implementation lookup.
pub struct StageTable {
    stages: BTreeMap<String, Arc<dyn Stage>>,
    fallback: StageFallback,
}

impl StageTable {
    pub fn new(fallback: StageFallback) -> Self {
        Self {
            stages: BTreeMap::new(),
            fallback,
        }
    }

    pub fn from_settings(settings: &StageSettings) -> Self {
        let mut table = Self::new(settings.fallback);
        for (name, spec) in &settings.stages {
            table.register(name, Arc::new(CommandStage::new(spec.clone())));
        }
        table
    }

    pub fn register(&mut self, name: &str, stage: Arc<dyn Stage>) {
        if self.stages.insert(name.to_string(), stage).is_some() {
            warn!("Stage {} registered twice; keeping the last one", name);
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Stage>, StageError> {
        if let Some(stage) = self.stages.get(name) {
            return Ok(Arc::clone(stage));
        }
        match self.fallback {
            StageFallback::Passthrough => Ok(Arc::new(PassthroughStage)),
            StageFallback::Error => Err(StageError::UnknownStage(name.to_string())),
        }
    }
}
