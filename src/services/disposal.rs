//! Moving or deleting a source file after its record was delivered.
//!
//! Stations sometimes still hold a lock on the file they just wrote, so each
//! disposal gets a few attempts with a short fixed pause in between.

use crate::models::DisposalMode;
use camino::{Utf8Path, Utf8PathBuf};
use std::io;
use std::time::Duration;
use thiserror::Error;

pub const DISPOSAL_ATTEMPTS: u32 = 5;
pub const DISPOSAL_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
#[error("Failed to {action} {path} after {attempts} attempts: {source}")]
pub struct DisposalError {
    pub action: &'static str,
    pub path: Utf8PathBuf,
    pub attempts: u32,
    #[source]
    pub source: io::Error,
}

/// Where a delivered file goes: `None` for delete, otherwise the same relative
/// path under `target_root` as it had under `source_root`
pub fn disposal_target(
    mode: DisposalMode,
    source_root: &Utf8Path,
    target_root: &Utf8Path,
    path: &Utf8Path,
) -> Option<Utf8PathBuf> {
    match mode {
        DisposalMode::Delete => None,
        DisposalMode::Move => {
            let relative = path
                .strip_prefix(source_root)
                .ok()
                .map(Utf8Path::to_path_buf)
                .or_else(|| path.file_name().map(Utf8PathBuf::from))
                .unwrap_or_else(|| path.to_path_buf());
            Some(target_root.join(relative))
        }
    }
}

async fn move_file(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(from, to).await {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
        other => other,
    }
}

/// Move `path` to `target`, or delete it when `target` is `None`
pub async fn dispose(path: &Utf8Path, target: Option<&Utf8Path>) -> Result<(), DisposalError> {
    dispose_with(path, target, DISPOSAL_ATTEMPTS, DISPOSAL_BACKOFF).await
}

pub async fn dispose_with(
    path: &Utf8Path,
    target: Option<&Utf8Path>,
    attempts: u32,
    backoff: Duration,
) -> Result<(), DisposalError> {
    let attempts = attempts.max(1);
    let action = if target.is_some() { "move" } else { "delete" };
    let mut last_error = None;

    for attempt in 1..=attempts {
        let result = match target {
            Some(to) => move_file(path, to).await,
            None => tokio::fs::remove_file(path).await,
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    "Attempt {}: could not {} {} ({}), retrying in {:?}",
                    attempt,
                    action,
                    path,
                    e,
                    backoff
                );
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(backoff).await;
        }
    }

    Err(DisposalError {
        action,
        path: path.to_path_buf(),
        attempts,
        source: last_error.unwrap_or_else(|| io::Error::other("no attempt made")),
    })
}
