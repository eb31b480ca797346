use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::FmtSubscriber;

mod repository;

use repository::FileRepository;
use territory_data::Repository as _;
use territory_engine::{run, EngineOptions, RunMode};

#[derive(Parser)]
#[command(name = "territory", about = "Sales territory assignment engine runner")]
struct Cli {
    /// Logging level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one build against a directory of JSON fixtures.
    Run {
        /// Directory containing accounts.json, reps.json, opportunities.json, config.json.
        #[arg(long)]
        build_dir: PathBuf,
        /// Build identifier, threaded through to telemetry rows.
        #[arg(long, default_value = "cli-build")]
        build_id: String,
        #[arg(long, value_enum, default_value = "relaxed")]
        mode: CliRunMode,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliRunMode {
    Waterfall,
    Relaxed,
}

impl From<CliRunMode> for RunMode {
    fn from(mode: CliRunMode) -> Self {
        match mode {
            CliRunMode::Waterfall => RunMode::Waterfall,
            CliRunMode::Relaxed => RunMode::Relaxed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder().with_max_level(cli.log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    match cli.command {
        Commands::Run {
            build_dir,
            build_id,
            mode,
        } => run_build(build_dir, build_id, mode.into()).await,
    }
}

async fn run_build(build_dir: PathBuf, build_id: String, mode: RunMode) -> anyhow::Result<()> {
    info!(build_dir = %build_dir.display(), "loading build");
    let repository = FileRepository::new(build_dir);

    let options = EngineOptions {
        mode,
        ..EngineOptions::default()
    };

    let outcome = run(&repository, &build_id, options)
        .await
        .map_err(|e| anyhow::anyhow!("engine run failed: {e}"))?;

    println!(
        "customer assignments: {}, prospect assignments: {}",
        outcome.customer_assignments.len(),
        outcome.prospect_assignments.len()
    );
    for warning in &outcome.warnings {
        println!("warning: {warning}");
    }
    if let Some(err) = &outcome.customer_error {
        println!("customer pass error: {err}");
    }
    if let Some(err) = &outcome.prospect_error {
        println!("prospect pass error: {err}");
    }

    repository
        .persist_assignments(
            &build_id,
            &[outcome.customer_assignments, outcome.prospect_assignments].concat(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("persisting assignments failed: {e}"))?;

    Ok(())
}
