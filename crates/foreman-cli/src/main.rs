//! `foreman`: the CLI surface for the agent-fleet orchestration engine
//! (§6), a single binary with one subcommand per operation.

mod cancel_signal;
mod commands;
mod output;
mod plan_source;
mod registry;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use foreman_core::task::ExecutionMode as CoreExecutionMode;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "foreman", about = "Orchestration engine for fleets of AI coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExecutionModeArg {
    Sequential,
    Parallel,
    Hybrid,
}

impl From<ExecutionModeArg> for CoreExecutionMode {
    fn from(value: ExecutionModeArg) -> Self {
        match value {
            ExecutionModeArg::Sequential => CoreExecutionMode::Sequential,
            ExecutionModeArg::Parallel => CoreExecutionMode::Parallel,
            ExecutionModeArg::Hybrid => CoreExecutionMode::Hybrid,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan file (JSON/TOML) or decompose free-form user text and execute it
    Run {
        /// Path to a plan file, or a bare string of user text
        input: String,
        /// Scheduling mode; hybrid (Kahn-batch, the default) honors dependencies
        #[arg(long, value_enum, default_value = "hybrid")]
        mode: ExecutionModeArg,
        /// Overrides ORCHESTRATOR_MAX_CONCURRENT for this run
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Overrides ORCHESTRATOR_CHECKPOINT_DIR for this run
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        /// Keep scheduling independent batches after a task fails
        #[arg(long)]
        continue_on_error: bool,
        /// Agent used for meta-decomposition when `input` is free text
        #[arg(long, default_value = "claude")]
        decompose_agent: String,
    },
    /// Continue a previously interrupted execution from its latest checkpoint
    Resume {
        execution_id: Uuid,
        /// Path to the same plan file the original `run` used
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, value_enum, default_value = "hybrid")]
        mode: ExecutionModeArg,
        #[arg(long)]
        max_concurrent: Option<usize>,
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Show the latest checkpoint for one execution
    Status {
        execution_id: Uuid,
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
    /// Request cancellation of an in-progress execution
    Cancel {
        execution_id: Uuid,
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
    /// List all known executions
    List {
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
}

fn resolve_checkpoint_dir(override_dir: Option<PathBuf>) -> PathBuf {
    override_dir.unwrap_or_else(|| foreman_core::config::OrchestratorConfig::resolve().checkpoint_dir)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run {
            input,
            mode,
            max_concurrent,
            checkpoint_dir,
            continue_on_error,
            decompose_agent,
        } => {
            let args = commands::run::RunArgs {
                input,
                mode: mode.into(),
                max_concurrent,
                checkpoint_dir,
                continue_on_error,
                decompose_agent,
            };
            commands::run::run(args).await?
        }
        Commands::Resume {
            execution_id,
            plan,
            mode,
            max_concurrent,
            checkpoint_dir,
            continue_on_error,
        } => {
            let args = commands::resume::ResumeArgs {
                execution_id,
                plan_path: plan,
                mode: mode.into(),
                max_concurrent,
                checkpoint_dir,
                continue_on_error,
            };
            commands::resume::run(args).await?
        }
        Commands::Status {
            execution_id,
            checkpoint_dir,
        } => {
            commands::status::run(resolve_checkpoint_dir(checkpoint_dir), execution_id).await?;
            output::ExitCode::Success
        }
        Commands::Cancel {
            execution_id,
            checkpoint_dir,
        } => {
            commands::cancel::run(resolve_checkpoint_dir(checkpoint_dir), execution_id)
                .context("cancel failed")?;
            output::ExitCode::Success
        }
        Commands::List { checkpoint_dir } => {
            commands::list::run(resolve_checkpoint_dir(checkpoint_dir)).await?;
            output::ExitCode::Success
        }
    };

    std::process::exit(exit_code.code());
}
