//! In-process execution contexts.
//!
//! `LocalProvider` sizes each phase's context from the resource annotation,
//! then runs invocations as tokio tasks bounded by the context's job count.
//! In cluster modes every stage command is prefixed with the configured
//! launcher so the actual work lands on the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::stage::{ExecutionContext, StageTable};
use super::{ContextProvider, ContextRequest, Scheduler};
use crate::config::SharedConfig;
use crate::errors::{ConfigError, StageError};
use crate::parallel::ParallelSpec;
use crate::resources::{ContextSizing, size_context};
use crate::work_unit::{Batch, unit_count};

pub struct LocalProvider {
    stages: Arc<StageTable>,
    launcher: Option<String>,
}

impl LocalProvider {
    pub fn new(stages: StageTable) -> Self {
        Self {
            stages: Arc::new(stages),
            launcher: None,
        }
    }

    /// Prefix template for cluster execution; see `render_launcher`.
    pub fn with_launcher(mut self, template: impl Into<String>) -> Self {
        self.launcher = Some(template.into());
        self
    }

    /// Build the provider the run's configuration describes.
    pub fn from_config(config: &SharedConfig, parallel: &ParallelSpec) -> Result<Self, ConfigError> {
        let provider = Self::new(StageTable::from_settings(&config.stage_settings()?));
        if parallel.mode.is_local() {
            return Ok(provider);
        }
        let template = config.launcher().ok_or(ConfigError::MissingLauncher)?;
        Ok(provider.with_launcher(template))
    }
}

/// Fill `{scheduler}`, `{queue}`, `{cores}` and `{memory}` in a launcher template.
pub fn render_launcher(template: &str, parallel: &ParallelSpec, sizing: &ContextSizing) -> String {
    let memory = sizing
        .memory_gb
        .map(|gb| format!("{}G", gb.ceil() as u64))
        .unwrap_or_default();
    template
        .replace("{scheduler}", parallel.scheduler.as_deref().unwrap_or(""))
        .replace("{queue}", parallel.queue.as_deref().unwrap_or(""))
        .replace("{cores}", &sizing.cores_per_job.to_string())
        .replace("{memory}", &memory)
}

#[async_trait]
impl ContextProvider for LocalProvider {
    async fn open(&self, request: ContextRequest<'_>) -> Result<Box<dyn Scheduler>, StageError> {
        let sizing = size_context(
            request.parallel,
            request.annotation,
            request.config,
            unit_count(request.batches),
            request.multiplier,
            request.max_multicore,
        );
        info!(
            "Opening {} context for {}: {} jobs x {} cores{}",
            request.context_class,
            request.phase,
            sizing.num_jobs,
            sizing.cores_per_job,
            sizing
                .memory_gb
                .map(|gb| format!(", {gb:.1}G memory"))
                .unwrap_or_default()
        );
        if !request.annotation.file_resources.is_empty() {
            let files: usize = request
                .batches
                .iter()
                .flatten()
                .map(|unit| request.annotation.file_resource_paths(&unit.to_value()).len())
                .sum();
            debug!(
                "{} file resources referenced; local contexts share the filesystem",
                files
            );
        }

        let launcher = self
            .launcher
            .as_deref()
            .map(|template| render_launcher(template, request.parallel, &sizing));
        let context = ExecutionContext {
            phase: request.phase.to_string(),
            context_class: request.context_class.to_string(),
            sizing,
            config: request.config.clone(),
            dirs: request.dirs.clone(),
            run_spec: request.run_spec.to_path_buf(),
            launcher,
        };
        Ok(Box::new(LocalScheduler::new(Arc::clone(&self.stages), context)))
    }
}

pub struct LocalScheduler {
    stages: Arc<StageTable>,
    context: Arc<ExecutionContext>,
    permits: Arc<Semaphore>,
}

impl LocalScheduler {
    pub fn new(stages: Arc<StageTable>, context: ExecutionContext) -> Self {
        let permits = Arc::new(Semaphore::new(context.sizing.num_jobs.max(1)));
        Self {
            stages,
            context: Arc::new(context),
            permits,
        }
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn invoke(&self, stage: &str, calls: Vec<Batch>) -> Result<Vec<Batch>, StageError> {
        let implementation = self.stages.resolve(stage)?;
        let total = calls.len();
        let mut tasks = JoinSet::new();
        for (index, args) in calls.into_iter().enumerate() {
            let implementation = Arc::clone(&implementation);
            let context = Arc::clone(&self.context);
            let permits = Arc::clone(&self.permits);
            let name = stage.to_string();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| StageError::Aborted(e.to_string()))?;
                let out = implementation.run(&name, args, &context).await?;
                Ok::<_, StageError>((index, out))
            });
        }

        let mut results: Vec<Option<Vec<Batch>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            // Returning early drops the set, which aborts the remaining invocations.
            let (index, out) = joined.map_err(|e| StageError::Aborted(e.to_string()))??;
            results[index] = Some(out);
        }
        Ok(results.into_iter().flatten().flatten().collect())
    }

    async fn release(&self) {
        self.permits.close();
        debug!("Released {} context for {}", self.context.context_class, self.context.phase);
    }
}
