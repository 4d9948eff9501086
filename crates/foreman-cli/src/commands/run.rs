//! `foreman run <plan.json|plan.toml|userText>`: decomposes or loads a
//! plan, then drives the DAG Scheduler to completion.

use std::path::PathBuf;

use anyhow::{Context, Result};
use foreman_core::checkpoint::{CheckpointMode, FilesystemCheckpointStore};
use foreman_core::events::EventSink;
use foreman_core::scheduler::{self, SchedulerContext};
use foreman_core::selector::AgentSelector;
use foreman_core::task::ExecutionMode;
use uuid::Uuid;

use crate::output::{exit_code_for, print_execution_result, ExitCode};
use crate::{cancel_signal, plan_source, registry};

pub struct RunArgs {
    pub input: String,
    pub mode: ExecutionMode,
    pub max_concurrent: Option<usize>,
    pub checkpoint_dir: Option<PathBuf>,
    pub continue_on_error: bool,
    pub decompose_agent: String,
}

pub async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut config = foreman_core::config::OrchestratorConfig::resolve();
    if let Some(n) = args.max_concurrent {
        config = config.with_max_concurrent(n);
    }
    if let Some(dir) = args.checkpoint_dir.clone() {
        config = config.with_checkpoint_dir(dir);
    }
    config = config.with_continue_on_error(args.continue_on_error);

    let harnesses = registry::build(&config);
    let decompose_harness = harnesses
        .get(&args.decompose_agent)
        .with_context(|| format!("unknown meta-decomposer agent: {}", args.decompose_agent))?;

    let workspace_root = config.checkpoint_dir.join("workspaces");
    std::fs::create_dir_all(&workspace_root).context("creating workspace root")?;
    let decompose_workspace = workspace_root.join("decompose");
    std::fs::create_dir_all(&decompose_workspace).context("creating decompose workspace")?;

    let plan = match plan_source::resolve(
        &args.input,
        decompose_harness,
        &decompose_workspace,
        config.default_timeout,
    )
    .await
    {
        Ok(plan) if !plan.is_empty() => plan,
        Ok(_) => {
            eprintln!("error: resolved plan has no tasks");
            return Ok(ExitCode::InvalidInput);
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            return Ok(ExitCode::InvalidInput);
        }
    };

    let execution_id = Uuid::new_v4();
    let checkpoint_store = FilesystemCheckpointStore::new(config.checkpoint_dir.clone());
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
    cancel_signal::watch(config.checkpoint_dir.clone(), execution_id, cancel.clone());
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    println!("execution_id: {execution_id}");
    let result = scheduler::run(&ctx, &plan, args.mode, execution_id, cancel).await?;

    print_execution_result(execution_id, &result);
    Ok(exit_code_for(&result))
}
