//! Scheduler capability: the seam between orchestration and execution.
//!
//! The orchestrator never fans work out itself. For every phase it asks a
//! `ContextProvider` for an execution context sized to the phase's resource
//! annotation and the live batch, then dispatches each step through the
//! returned `Scheduler`. A scheduler call is a barrier: it returns only once
//! every invocation finished, and the first failure fails the whole step.
//!
//! `local` provides the in-process implementation used by the binary; tests
//! and embedders plug in their own.

pub mod local;
pub mod stage;

use std::path::Path;

use async_trait::async_trait;

use crate::config::SharedConfig;
use crate::driver::Directories;
use crate::errors::StageError;
use crate::parallel::ParallelSpec;
use crate::resources::ResourceAnnotation;
use crate::work_unit::Batch;

pub use local::{LocalProvider, LocalScheduler};
pub use stage::{CommandStage, ExecutionContext, PassthroughStage, Stage, StageTable};

/// An open execution context.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run `stage` once per entry of `calls` and concatenate the returned
    /// batches in call order.
    async fn invoke(&self, stage: &str, calls: Vec<Batch>) -> Result<Vec<Batch>, StageError>;

    /// Give the context's resources back. Called once the phase is done,
    /// whether it succeeded or not.
    async fn release(&self) {}
}

/// Everything a provider needs to size and open a phase's context.
#[derive(Debug, Clone, Copy)]
pub struct ContextRequest<'a> {
    pub phase: &'a str,
    pub context_class: &'a str,
    pub annotation: &'a ResourceAnnotation,
    /// The batches the context is sized for
    pub batches: &'a [Batch],
    pub config: &'a SharedConfig,
    pub dirs: &'a Directories,
    pub parallel: &'a ParallelSpec,
    pub run_spec: &'a Path,
    pub multiplier: u32,
    pub max_multicore: Option<u32>,
}

#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn open(&self, request: ContextRequest<'_>) -> Result<Box<dyn Scheduler>, StageError>;
}
