//! Pipeline variants and the phase runner that executes them.
//!
//! A pipeline is an ordered plan of phases. Running one threads the batch
//! through every phase in order: each phase opens one execution context,
//! runs its sections step by step, and releases the context whether the
//! steps succeeded or not. Step outputs fully replace the batch.

pub mod registry;
pub mod variants;

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use crate::config::SharedConfig;
use crate::driver::Directories;
use crate::errors::{PhaseError, StageError};
use crate::parallel::ParallelSpec;
use crate::phase::{Dispatch, Phase, Step};
use crate::provenance::PhaseRecord;
use crate::scheduler::{ContextProvider, ContextRequest, Scheduler};
use crate::work_unit::{Batch, find_duplicate, flatten, unit_count};
use crate::world::WorldWatcher;

pub use registry::{PipelineRegistry, Registration};
pub use variants::StagedPipeline;

/// Run-wide state shared by every phase of a pipeline.
pub struct RunContext<'a> {
    pub config: &'a SharedConfig,
    pub run_spec: &'a Path,
    pub parallel: &'a ParallelSpec,
    pub dirs: &'a Directories,
    pub provider: &'a dyn ContextProvider,
    /// Completed phases, in order
    pub phases: Vec<PhaseRecord>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        config: &'a SharedConfig,
        run_spec: &'a Path,
        parallel: &'a ParallelSpec,
        dirs: &'a Directories,
        provider: &'a dyn ContextProvider,
    ) -> Self {
        Self {
            config,
            run_spec,
            parallel,
            dirs,
            provider,
            phases: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Canonical name, shared by every alias of this pipeline.
    fn name(&self) -> &str;

    fn plan(&self) -> Vec<Phase>;

    /// Thread `batches` through every phase of the plan.
    async fn run(
        &self,
        ctx: &mut RunContext<'_>,
        batches: Vec<Batch>,
    ) -> Result<Vec<Batch>, PhaseError> {
        run_phases(&self.plan(), ctx, batches).await
    }
}

pub async fn run_phases(
    phases: &[Phase],
    ctx: &mut RunContext<'_>,
    mut batches: Vec<Batch>,
) -> Result<Vec<Batch>, PhaseError> {
    let mut watcher = WorldWatcher::deferred(&ctx.dirs.work, ctx.config);
    for phase in phases {
        batches = run_phase(phase, ctx, &mut watcher, batches).await?;
    }
    info!("Timing: finished");
    Ok(batches)
}

/// Run one phase inside its own execution context.
pub async fn run_phase(
    phase: &Phase,
    ctx: &mut RunContext<'_>,
    watcher: &mut WorldWatcher,
    batches: Vec<Batch>,
) -> Result<Vec<Batch>, PhaseError> {
    let started = Instant::now();
    let units_in = unit_count(&batches);
    let multiplier = phase.multiplier.compute(&batches);
    let request = ContextRequest {
        phase: &phase.label,
        context_class: &phase.context_class,
        annotation: &phase.annotation,
        batches: phase.sizing_batches(&batches),
        config: ctx.config,
        dirs: ctx.dirs,
        parallel: ctx.parallel,
        run_spec: ctx.run_spec,
        multiplier,
        max_multicore: phase.max_multicore,
    };
    let scheduler = ctx
        .provider
        .open(request)
        .await
        .map_err(|source| PhaseError::Context {
            phase: phase.label.clone(),
            source,
        })?;

    let result = run_sections(phase, scheduler.as_ref(), watcher, batches).await;
    scheduler.release().await;
    let batches = result?;

    if let Some(description) = find_duplicate(&batches) {
        return Err(PhaseError::DuplicateIdentity {
            phase: phase.label.clone(),
            description: description.to_string(),
        });
    }

    let duration = started.elapsed();
    info!(
        "Phase {} finished in {:.1}s ({} -> {} units)",
        phase.label,
        duration.as_secs_f64(),
        units_in,
        unit_count(&batches)
    );
    ctx.phases.push(PhaseRecord {
        label: phase.label.clone(),
        context_class: phase.context_class.clone(),
        multiplier,
        units_in,
        units_out: unit_count(&batches),
        duration_secs: duration.as_secs_f64(),
    });
    Ok(batches)
}

async fn run_sections(
    phase: &Phase,
    scheduler: &dyn Scheduler,
    watcher: &mut WorldWatcher,
    mut batches: Vec<Batch>,
) -> Result<Vec<Batch>, PhaseError> {
    for section in &phase.sections {
        info!("Timing: {}", section.label);
        for step in &section.steps {
            batches = dispatch(scheduler, step, batches)
                .await
                .map_err(|source| PhaseError::Step {
                    phase: phase.label.clone(),
                    section: section.label.clone(),
                    stage: step.stage.clone(),
                    source,
                })?;
        }
        watcher.report(&section.label, &batches);
    }
    Ok(batches)
}

/// Hand the batches to the scheduler the way the step asks for.
pub async fn dispatch(
    scheduler: &dyn Scheduler,
    step: &Step,
    batches: Vec<Batch>,
) -> Result<Vec<Batch>, StageError> {
    match step.dispatch {
        Dispatch::PerUnit => scheduler.invoke(&step.stage, batches).await,
        Dispatch::WholeBatch => scheduler.invoke(&step.stage, vec![flatten(batches)]).await,
        Dispatch::PerUnitSideEffect => {
            for batch in &batches {
                scheduler.invoke(&step.stage, vec![batch.clone()]).await?;
            }
            Ok(batches)
        }
    }
}
