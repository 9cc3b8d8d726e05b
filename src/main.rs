use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "seqforge")]
#[command(version, about = "Sequencing analysis pipeline orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every sample of a run specification through its pipeline
    Run {
        /// Run specification (YAML). Defaults to run_info.yaml in --fc-dir
        run_spec: Option<PathBuf>,
        /// Working directory for outputs, logs and temporary files
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,
        /// System configuration (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Input directory with sequencing files
        #[arg(long)]
        fc_dir: Option<PathBuf>,
        /// Execution mode: local, clusterk or ipython
        #[arg(short = 't', long = "paralleltype", default_value = "local")]
        mode: String,
        /// Cluster scheduler, required for ipython runs
        #[arg(short, long)]
        scheduler: Option<String>,
        /// Cluster queue, required for ipython runs unless the scheduler is sge
        #[arg(short, long)]
        queue: Option<String>,
        /// Total cores available to the run
        #[arg(short = 'n', long = "numcores", default_value = "1")]
        cores: usize,
        /// Workflow tag recorded with the run
        #[arg(long)]
        workflow: Option<String>,
    },
    /// List registered pipelines and their aliases
    Pipelines,
    /// Show the phases and steps of a pipeline
    Plan {
        /// Analysis type, as written in a run specification
        analysis: String,
    },
    /// Parse and pair a run specification without running anything
    Check {
        run_spec: PathBuf,
        /// System configuration (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            run_spec,
            workdir,
            config,
            fc_dir,
            mode,
            scheduler,
            queue,
            cores,
            workflow,
        } => {
            let mut options = seqforge::driver::RunOptions::new(workdir, run_spec.clone());
            options.system_config = config.clone();
            options.fc_dir = fc_dir.clone();
            options.mode = mode.clone();
            options.cores = *cores;
            options.scheduler = scheduler.clone();
            options.queue = queue.clone();
            options.workflow = workflow.clone();
            options.verbose = cli.verbose;
            cmd::cmd_run(options).await?;
        }
        Commands::Pipelines => cmd::cmd_pipelines()?,
        Commands::Plan { analysis } => cmd::cmd_plan(analysis)?,
        Commands::Check { run_spec, config } => {
            cmd::cmd_check(run_spec, config.as_deref(), cli.verbose)?
        }
    }

    Ok(())
}
