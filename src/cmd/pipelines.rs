//! `seqforge pipelines` and `seqforge plan`.

use anyhow::Result;
use console::style;

use seqforge::phase::{Multiplier, Sizing};
use seqforge::pipeline::PipelineRegistry;

pub fn cmd_pipelines() -> Result<()> {
    let registry = PipelineRegistry::builtin()?;

    println!();
    println!("{:<16} Aliases", "Pipeline");
    println!("{:<16} -------", "----------------");
    for entry in registry.entries().iter().filter(|e| !e.is_alias()) {
        let aliases = registry.aliases_of(entry.pipeline.name());
        println!(
            "{:<16} {}",
            entry.name,
            style(aliases.join(", ")).dim()
        );
    }
    println!();
    Ok(())
}

pub fn cmd_plan(analysis: &str) -> Result<()> {
    let registry = PipelineRegistry::builtin()?;
    let registration = registry.resolve(analysis)?;
    let pipeline = &registration.pipeline;

    println!();
    println!("{}", style(pipeline.name()).bold());
    for (index, phase) in pipeline.plan().iter().enumerate() {
        let mut notes = Vec::new();
        if phase.multiplier != Multiplier::Single {
            notes.push(format!("multiplier: {:?}", phase.multiplier));
        }
        if let Some(cores) = phase.max_multicore {
            notes.push(format!("max cores per job: {cores}"));
        }
        if phase.sizing == Sizing::FirstUnit {
            notes.push("sized by first unit".to_string());
        }
        for (tool, gb) in &phase.annotation.memory_floors {
            notes.push(format!("{tool} >= {gb}G"));
        }

        println!();
        println!(
            "{}. {} [{}]",
            index + 1,
            style(&phase.label).bold(),
            phase.context_class
        );
        println!("   tools: {}", phase.annotation.tools.join(", "));
        if !notes.is_empty() {
            println!("   {}", style(notes.join("; ")).dim());
        }
        for section in &phase.sections {
            println!("   {}", section.label);
            for step in &section.steps {
                println!("     - {} {}", step.stage, style(format!("({})", step.dispatch)).dim());
            }
        }
    }
    println!();
    Ok(())
}
