//! Startup and shutdown hooks plus the periodic sweep that reclaims expired
//! placeholders, orphaned temp files and stale lock records.

use crate::config::Config;
use crate::error::{Error, Result, ResultIoExt};
use crate::lock::LockManager;
use crate::sessions::SessionStore;
use std::sync::Arc;
use std::time::Duration;

/// Default sweep interval: 1 hour
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Create the repository, session and shared-lock directories at startup
pub async fn ensure_directories(config: &Config) -> Result<()> {
    let mode = config.dir_mode()?;
    for dir in [
        &config.storage.repository_dir,
        &config.storage.session_dir,
        &config.storage.shared_lock_dir,
    ] {
        if dir.exists() {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let dir = dir.clone();
            tokio::task::spawn_blocking(move || {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(mode)
                    .create(&dir)
                    .map_io_err(&dir)
            })
            .await
            .map_err(|e| Error::Config {
                msg: format!("directory creation failed: {}", e),
            })??;
        }
        #[cfg(not(unix))]
        {
            tokio::fs::create_dir_all(dir).await.map_io_err(dir)?;
        }
    }
    Ok(())
}

/// Spawn the background task that periodically sweeps expired sessions and
/// stale lock records
pub fn spawn_sweep_task(
    sessions: Arc<SessionStore>,
    locks: Arc<LockManager>,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs);
        loop {
            tokio::time::sleep(interval).await;

            match sessions.sweep(None).await {
                Ok(count) if count > 0 => {
                    tracing::info!(count, "swept expired upload sessions");
                }
                Err(e) => {
                    tracing::error!(error = %e, "session sweep failed");
                }
                _ => {}
            }

            match locks.cleanup(true).await {
                Ok(count) if count > 0 => {
                    tracing::info!(count, "swept stale lock records");
                }
                Err(e) => {
                    tracing::error!(error = %e, "lock sweep failed");
                }
                _ => {}
            }
        }
    });
}

/// Shutdown hook: remove every placeholder and lock record regardless of age
pub async fn shutdown_sweep(sessions: &SessionStore, locks: &LockManager) {
    if let Err(e) = sessions.sweep(Some(Duration::ZERO)).await {
        tracing::error!(error = %e, "shutdown session sweep failed");
    }
    if let Err(e) = locks.cleanup(false).await {
        tracing::error!(error = %e, "shutdown lock sweep failed");
    }
}
