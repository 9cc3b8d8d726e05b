//! `seqforge run`.

use anyhow::Result;
use console::style;

use seqforge::driver::{RunOptions, run_main};
use seqforge::work_unit::unit_count;

pub async fn cmd_run(options: RunOptions) -> Result<()> {
    let summary = run_main(options).await?;

    println!();
    for output in &summary.outputs {
        println!(
            "{} {} ({} units)",
            style("✓").green(),
            output.name,
            unit_count(&output.batches)
        );
    }
    println!(
        "Provenance written to {}",
        style(summary.record_path.display()).dim()
    );
    Ok(())
}
