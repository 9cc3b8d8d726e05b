//! Resource annotations and execution-context sizing.
//!
//! Every phase declares which external tools it runs, which file resources
//! must be staged when the filesystem is not shared, and memory floors for
//! tools that misbehave on small allocations. A provider turns that, plus the
//! live batch shape, into a concrete `ContextSizing`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::config::SharedConfig;
use crate::parallel::ParallelSpec;

/// Declared requirements of a phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceAnnotation {
    /// Third party tools used in the phase
    pub tools: Vec<String>,
    /// Key paths into a work unit whose files must be transferred on non-shared filesystems
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_resources: Vec<Vec<String>>,
    /// Minimum memory in GB per tool, applied regardless of core count
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub memory_floors: BTreeMap<String, f64>,
}

impl ResourceAnnotation {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_file_resource(mut self, path: &[&str]) -> Self {
        self.file_resources
            .push(path.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_memory_floor(mut self, tool: &str, gb: f64) -> Self {
        self.memory_floors.insert(tool.to_string(), gb);
        self
    }

    /// String values found under the declared file resource paths of a unit.
    ///
    /// Lists are expanded, nested mappings contribute their string leaves.
    pub fn file_resource_paths(&self, unit: &Value) -> Vec<String> {
        let mut out = Vec::new();
        for path in &self.file_resources {
            let mut current = Some(unit);
            for key in path {
                current = current.and_then(|v| v.get(key));
            }
            if let Some(value) = current {
                collect_strings(value, &mut out);
            }
        }
        out
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Concrete shape of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextSizing {
    pub cores_per_job: usize,
    pub num_jobs: usize,
    /// Memory per job in GB, when any tool declares one
    pub memory_gb: Option<f64>,
}

/// Size a context from the run's cores, per-tool configuration and the batch.
///
/// `items` is the number of units the context will be sized for; together
/// with `multiplier` it bounds how many jobs are worth starting.
pub fn size_context(
    parallel: &ParallelSpec,
    annotation: &ResourceAnnotation,
    config: &SharedConfig,
    items: usize,
    multiplier: u32,
    max_multicore: Option<u32>,
) -> ContextSizing {
    let total = parallel.cores.max(1);
    let tool_cores = annotation
        .tools
        .iter()
        .filter_map(|tool| config.tool_resources(tool))
        .filter_map(|params| params.get("cores").and_then(Value::as_u64))
        .max()
        .map(|c| c as usize)
        .unwrap_or(total);
    let cap = max_multicore.map(|c| c.max(1) as usize).unwrap_or(usize::MAX);
    let cores_per_job = tool_cores.min(total).min(cap).max(1);

    let memory_gb = annotation
        .tools
        .iter()
        .filter_map(|tool| {
            let per_core = config
                .tool_resources(tool)
                .and_then(|params| params.get("memory"))
                .and_then(parse_memory_gb)
                .map(|gb| gb * cores_per_job as f64);
            let floor = annotation.memory_floors.get(tool).copied();
            match (per_core, floor) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            }
        })
        .fold(None, |acc: Option<f64>, gb| Some(acc.map_or(gb, |a| a.max(gb))));

    let wanted = items.max(1).saturating_mul(multiplier.max(1) as usize);
    let num_jobs = (total / cores_per_job).min(wanted).max(1);

    ContextSizing {
        cores_per_job,
        num_jobs,
        memory_gb,
    }
}

/// Parse a memory specification such as `3G`, `500M`, `1.5g` or a bare GB number.
pub fn parse_memory_gb(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            let (number, scale) = match s.chars().last()?.to_ascii_uppercase() {
                'T' => (&s[..s.len() - 1], 1024.0),
                'G' => (&s[..s.len() - 1], 1.0),
                'M' => (&s[..s.len() - 1], 1.0 / 1024.0),
                _ => (s, 1.0),
            };
            number.trim().parse::<f64>().ok().map(|n| n * scale)
        }
        _ => None,
    }
}
