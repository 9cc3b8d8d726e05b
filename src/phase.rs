//! Phase model for pipeline variants.
//!
//! This module provides:
//! - `Step`: one opaque stage invocation and how units are batched into it
//! - `Section`: a labelled, timed group of steps
//! - `Phase`: sections run under one resource-scoped execution context
//! - `Multiplier`: parallelism rules computed from the live batch

use serde::Serialize;
use serde_json::Value;

use crate::resources::ResourceAnnotation;
use crate::work_unit::{Batch, WorkUnit};

/// How a step hands the current batches to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// One invocation per batch, scheduler-parallelised
    PerUnit,
    /// One invocation receiving every unit
    WholeBatch,
    /// One invocation per batch whose results are awaited and discarded
    PerUnitSideEffect,
}

impl std::fmt::Display for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::PerUnit => write!(f, "per-unit"),
            Dispatch::WholeBatch => write!(f, "whole-batch"),
            Dispatch::PerUnitSideEffect => write!(f, "per-unit (side effect)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub stage: String,
    pub dispatch: Dispatch,
}

impl Step {
    pub fn per_unit(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            dispatch: Dispatch::PerUnit,
        }
    }

    pub fn whole_batch(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            dispatch: Dispatch::WholeBatch,
        }
    }

    pub fn side_effect(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            dispatch: Dispatch::PerUnitSideEffect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub label: String,
    pub steps: Vec<Step>,
}

/// Parallelism rules evaluated against the batch right before a phase starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplier {
    #[default]
    Single,
    /// One extra job per split input of every unit that splits its alignment
    AlignmentSplits,
    /// Largest `callable_count` times number of variant callers over all units
    MaxRegions,
    /// Largest number of structural variant callers over all units
    StructuralCallers,
}

impl Multiplier {
    /// Always at least 1.
    pub fn compute(&self, batches: &[Batch]) -> u32 {
        let units = || batches.iter().flatten();
        let value = match self {
            Multiplier::Single => 1,
            Multiplier::AlignmentSplits => units()
                .filter(|unit| splits_alignment(unit))
                .map(|unit| match unit.field("align_splits") {
                    Some(Value::Array(splits)) if !splits.is_empty() => splits.len() as u64,
                    _ => 1,
                })
                .fold(1u64, u64::saturating_add),
            Multiplier::MaxRegions => units()
                .map(|unit| {
                    let count = unit
                        .algorithm("callable_count")
                        .and_then(Value::as_u64)
                        .unwrap_or(1);
                    count.saturating_mul(list_len(unit.algorithm("variantcaller")).max(1) as u64)
                })
                .max()
                .unwrap_or(1),
            Multiplier::StructuralCallers => units()
                .map(|unit| list_len(unit.algorithm("svcaller")) as u64)
                .max()
                .unwrap_or(1),
        };
        u32::try_from(value.max(1)).unwrap_or(u32::MAX)
    }
}

fn splits_alignment(unit: &WorkUnit) -> bool {
    !matches!(
        unit.algorithm("align_split_size"),
        None | Some(Value::Null) | Some(Value::Bool(false))
    )
}

/// A setting that may be a single name or a list of names.
fn list_len(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Array(items)) => items.len(),
        Some(Value::String(s)) if !s.is_empty() => 1,
        _ => 0,
    }
}

/// Which units an execution context is sized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sizing {
    #[default]
    AllUnits,
    /// Cohort-level phases that run as a single job
    FirstUnit,
}

/// Steps run under one resource-scoped execution context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Phase {
    pub label: String,
    /// Opaque scheduling profile id, e.g. "multicore" or "full"
    pub context_class: String,
    pub annotation: ResourceAnnotation,
    pub multiplier: Multiplier,
    pub max_multicore: Option<u32>,
    pub sizing: Sizing,
    pub sections: Vec<Section>,
}

impl Phase {
    pub fn new(label: &str, context_class: &str) -> Self {
        Self {
            label: label.to_string(),
            context_class: context_class.to_string(),
            annotation: ResourceAnnotation::default(),
            multiplier: Multiplier::Single,
            max_multicore: None,
            sizing: Sizing::AllUnits,
            sections: Vec::new(),
        }
    }

    pub fn tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let floors = std::mem::take(&mut self.annotation.memory_floors);
        let files = std::mem::take(&mut self.annotation.file_resources);
        self.annotation = ResourceAnnotation::new(tools);
        self.annotation.memory_floors = floors;
        self.annotation.file_resources = files;
        self
    }

    pub fn file_resource(mut self, path: &[&str]) -> Self {
        self.annotation = self.annotation.with_file_resource(path);
        self
    }

    pub fn memory_floor(mut self, tool: &str, gb: f64) -> Self {
        self.annotation = self.annotation.with_memory_floor(tool, gb);
        self
    }

    pub fn multiplier(mut self, multiplier: Multiplier) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn max_multicore(mut self, cores: u32) -> Self {
        self.max_multicore = Some(cores);
        self
    }

    pub fn sized_by_first_unit(mut self) -> Self {
        self.sizing = Sizing::FirstUnit;
        self
    }

    pub fn section(mut self, label: &str, steps: Vec<Step>) -> Self {
        self.sections.push(Section {
            label: label.to_string(),
            steps,
        });
        self
    }

    /// The batches an execution context is sized for.
    pub fn sizing_batches<'a>(&self, batches: &'a [Batch]) -> &'a [Batch] {
        match self.sizing {
            Sizing::AllUnits => batches,
            Sizing::FirstUnit => &batches[..batches.len().min(1)],
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.sections.iter().flat_map(|s| s.steps.iter())
    }
}
