//! Cross-process cancellation: `foreman cancel <executionId>` runs as a
//! separate invocation from the `run`/`resume` it targets, so in-process
//! `CancellationToken`s alone can't carry the signal across. A sentinel
//! file under the checkpoint directory bridges the gap — `run`/`resume`
//! poll for it and fold its presence into their `CancellationToken`. See
//! DESIGN.md for why a poll file was chosen over a daemon/socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn signal_path(checkpoint_dir: &Path, execution_id: Uuid) -> PathBuf {
    checkpoint_dir.join(execution_id.to_string()).join("cancel.requested")
}

/// Writes the sentinel file requesting cancellation of `execution_id`.
pub fn request(checkpoint_dir: &Path, execution_id: Uuid) -> std::io::Result<()> {
    let path = signal_path(checkpoint_dir, execution_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, b"")
}

/// Spawns a background task that cancels `token` as soon as the sentinel
/// file for `execution_id` appears, and stops polling once `token` is
/// cancelled for any reason (including by the poll itself).
pub fn watch(checkpoint_dir: PathBuf, execution_id: Uuid, token: CancellationToken) {
    let path = signal_path(&checkpoint_dir, execution_id);
    tokio::spawn(async move {
        while !token.is_cancelled() {
            if path.is_file() {
                token.cancel();
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requesting_cancel_trips_the_watched_token() {
        let dir = tempfile::tempdir().unwrap();
        let execution_id = Uuid::new_v4();
        let token = CancellationToken::new();
        watch(dir.path().to_path_buf(), execution_id, token.clone());

        assert!(!token.is_cancelled());
        request(dir.path(), execution_id).unwrap();

        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("token should cancel once the sentinel file appears");
    }
}
