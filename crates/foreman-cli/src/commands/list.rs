//! `foreman list`: summarizes every known execution as a table.

use std::path::PathBuf;

use anyhow::{Context, Result};
use foreman_core::checkpoint::{CheckpointStore, FilesystemCheckpointStore};

pub async fn run(checkpoint_dir: PathBuf) -> Result<()> {
    let store = FilesystemCheckpointStore::new(checkpoint_dir);
    let metas = store.list(None).await.context("listing checkpoints")?;

    if metas.is_empty() {
        println!("No executions found.");
        return Ok(());
    }

    println!("{:<38} {:<24} {:<12} {:>8}", "EXECUTION ID", "WORKFLOW", "STATUS", "VERSION");
    println!("{}", "-".repeat(86));
    for meta in &metas {
        println!(
            "{:<38} {:<24} {:<12} {:>8}",
            meta.execution_id,
            meta.workflow_id,
            format!("{:?}", meta.status),
            meta.latest_version
        );
    }

    Ok(())
}
