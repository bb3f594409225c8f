//! Background removal of abandoned staging directories.
//!
//! A client that stops mid-upload never finalizes, so its staging directory
//! would stay forever. Every directory whose modification time is older than
//! the TTL is deleted; each fragment write touches the directory, so active
//! uploads keep themselves fresh.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::{fs, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

/// Remove staging directories under `staging_root` last modified before
/// `now - ttl`. Returns how many were removed.
pub async fn sweep_stale(staging_root: &Path, ttl: Duration, now: SystemTime) -> io::Result<usize> {
    let cutoff = now.checked_sub(ttl).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut entries = match fs::read_dir(staging_root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let modified = match entry.metadata().await {
            Ok(meta) if meta.is_dir() => meta.modified()?,
            Ok(_) => continue,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not stat staging entry");
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale staging directory");
                removed += 1;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "could not remove stale staging directory"),
        }
    }
    Ok(removed)
}

/// Run [`sweep_stale`] every `interval` until the runtime shuts down.
pub fn spawn(staging_root: PathBuf, ttl: Duration, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_stale(&staging_root, ttl, SystemTime::now()).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "swept stale uploads"),
                Err(err) => warn!(error = %err, "staging sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_only_directories_older_than_ttl() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let stale = root.join("stale-upload");
        let fresh = root.join("fresh-upload");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::create_dir_all(&fresh).unwrap();
        std::fs::write(stale.join("chunk-0"), b"abandoned").unwrap();

        let two_days_ago = SystemTime::now() - Duration::from_secs(48 * 3600);
        std::fs::File::open(&stale)
            .unwrap()
            .set_modified(two_days_ago)
            .unwrap();

        let removed = sweep_stale(root, Duration::from_secs(24 * 3600), SystemTime::now())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn missing_root_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let removed = sweep_stale(&tmp.path().join("absent"), Duration::from_secs(1), SystemTime::now())
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
