//! `foreman status <executionId>`: prints the latest checkpoint for one
//! execution.

use std::path::PathBuf;

use anyhow::{Context, Result};
use foreman_core::checkpoint::{CheckpointStore, FilesystemCheckpointStore};
use uuid::Uuid;

pub async fn run(checkpoint_dir: PathBuf, execution_id: Uuid) -> Result<()> {
    let store = FilesystemCheckpointStore::new(checkpoint_dir);
    let checkpoint = store
        .load(execution_id)
        .await
        .context("loading checkpoint")?
        .with_context(|| format!("no checkpoint found for execution {execution_id}"))?;

    println!("{}", serde_json::to_string_pretty(&checkpoint).expect("checkpoint is serializable"));
    Ok(())
}
