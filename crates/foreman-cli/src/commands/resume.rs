//! `foreman resume <executionId> --plan <file>`: re-supplies the original
//! plan (checkpoints don't embed it, see DESIGN.md) and continues a run
//! from its latest checkpoint.

use std::path::PathBuf;

use anyhow::{Context, Result};
use foreman_core::checkpoint::{CheckpointMode, CheckpointStore, FilesystemCheckpointStore};
use foreman_core::events::EventSink;
use foreman_core::scheduler::{self, SchedulerContext};
use foreman_core::selector::AgentSelector;
use foreman_core::task::ExecutionMode;
use uuid::Uuid;

use crate::output::{exit_code_for, print_execution_result, ExitCode};
use crate::{cancel_signal, plan_source, registry};

pub struct ResumeArgs {
    pub execution_id: Uuid,
    pub plan_path: PathBuf,
    pub mode: ExecutionMode,
    pub max_concurrent: Option<usize>,
    pub checkpoint_dir: Option<PathBuf>,
    pub continue_on_error: bool,
}

pub async fn run(args: ResumeArgs) -> Result<ExitCode> {
    let mut config = foreman_core::config::OrchestratorConfig::resolve();
    if let Some(n) = args.max_concurrent {
        config = config.with_max_concurrent(n);
    }
    if let Some(dir) = args.checkpoint_dir.clone() {
        config = config.with_checkpoint_dir(dir);
    }
    config = config.with_continue_on_error(args.continue_on_error);

    let harnesses = registry::build(&config);
    let checkpoint_store = FilesystemCheckpointStore::new(config.checkpoint_dir.clone());
    match checkpoint_store.load(args.execution_id).await.context("loading checkpoint")? {
        Some(_) => {}
        None => {
            eprintln!("error: no checkpoint found for execution {}", args.execution_id);
            return Ok(ExitCode::InvalidInput);
        }
    }

    let plan = match plan_source::load_plan_file(&args.plan_path) {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("error: {err:#}");
            return Ok(ExitCode::InvalidInput);
        }
    };
    let workspace_root = config.checkpoint_dir.join("workspaces");

    let selector = AgentSelector::new();
    let events = EventSink::noop();

    let ctx = SchedulerContext {
        harnesses: &harnesses,
        selector: &selector,
        checkpoint_store: Some(&checkpoint_store),
        checkpoint_mode: CheckpointMode::BestEffort,
        events: &events,
        config: &config,
        workspace_root,
    };

    let cancel = tokio_util::sync::CancellationToken::new();
    cancel_signal::watch(config.checkpoint_dir.clone(), args.execution_id, cancel.clone());
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let result = scheduler::resume(&ctx, &plan, args.mode, args.execution_id, cancel).await?;

    print_execution_result(args.execution_id, &result);
    Ok(exit_code_for(&result))
}
