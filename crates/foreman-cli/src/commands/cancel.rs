//! `foreman cancel <executionId>`: requests cancellation of a `run`/
//! `resume` invocation that may be in progress in a different process,
//! via the sentinel file in [`crate::cancel_signal`].

use std::path::PathBuf;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::cancel_signal;

pub fn run(checkpoint_dir: PathBuf, execution_id: Uuid) -> Result<()> {
    cancel_signal::request(&checkpoint_dir, execution_id)
        .with_context(|| format!("requesting cancellation of {execution_id}"))?;
    println!("cancellation requested for {execution_id}");
    Ok(())
}
