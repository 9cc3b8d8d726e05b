//! `seqforge check`: parse and pair a run specification without running it.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use seqforge::config::SharedConfig;
use seqforge::logging;
use seqforge::pairing::pair;
use seqforge::pipeline::PipelineRegistry;
use seqforge::run_spec::RunSpecification;

pub fn cmd_check(run_spec: &Path, config: Option<&Path>, verbose: bool) -> Result<()> {
    logging::init_stderr(verbose);

    let config = SharedConfig::load(config)?;
    let spec = RunSpecification::load(run_spec)
        .with_context(|| format!("Invalid run specification {}", run_spec.display()))?;
    let registry = PipelineRegistry::builtin()?;
    let pairing = pair(spec, config, &registry)?;
    // Stage settings are only read at run time; surface mistakes now.
    pairing.config.stage_settings()?;

    println!();
    println!(
        "{} samples in {} groups",
        pairing.unit_count(),
        pairing.groups.len()
    );
    for group in &pairing.groups {
        let descriptions: Vec<&str> = group
            .batches
            .iter()
            .flatten()
            .map(|unit| unit.description.as_str())
            .collect();
        let canonical = group.registration.pipeline.name();
        let via = if group.registration.is_alias() {
            format!(" (alias of {canonical})")
        } else {
            String::new()
        };
        println!(
            "  {}{}: {}",
            style(&group.registration.name).bold(),
            style(via).dim(),
            descriptions.join(", ")
        );
    }
    println!();
    Ok(())
}
