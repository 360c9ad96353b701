use std::fs::{self, DirEntry};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;

use crate::json_log::LOG_FILE;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Deletes stored files older than a fixed age.
///
/// The sweeper works on the file system only: log entries of swept files are
/// left in place and show up in the gallery as broken links.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    root: PathBuf,
    max_age: Duration,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P, days: u64) -> Self {
        Self {
            root: root.into(),
            max_age: Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)),
        }
    }

    /// One pass over the upload tree. Returns the number of deleted files.
    pub fn sweep(&self) -> io::Result<usize> {
        let Some(cutoff) = SystemTime::now().checked_sub(self.max_age) else {
            return Ok(0);
        };
        let mut expired = Vec::new();
        visit_files(&self.root, &mut |entry: &DirEntry| {
            if entry.file_name() == LOG_FILE {
                return;
            }
            match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) if modified < cutoff => expired.push(entry.path()),
                Ok(_) => {}
                Err(e) => tracing::warn!("cannot stat {}: {e}", entry.path().display()),
            }
        })?;

        let mut deleted = 0;
        for path in expired {
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => tracing::warn!("cannot delete expired {}: {e}", path.display()),
            }
        }
        Ok(deleted)
    }

    /// Runs [`Self::sweep`] every `interval` on the blocking pool, off the request path.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sweeper = self.clone();
                match tokio::task::spawn_blocking(move || sweeper.sweep()).await {
                    Ok(Ok(0)) => tracing::debug!("retention sweep: nothing expired"),
                    Ok(Ok(n)) => tracing::info!("retention sweep deleted {n} expired files"),
                    Ok(Err(e)) => tracing::error!("retention sweep failed: {e}"),
                    Err(e) => tracing::error!("retention sweep task failed: {e}"),
                }
            }
        })
    }
}

/// Walks `dir` recursively calling `cb` for every file. A missing `dir` is empty.
pub(crate) fn visit_files(dir: &Path, cb: &mut dyn FnMut(&DirEntry)) -> io::Result<()> {
    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                visit_files(&path, cb)?;
            } else {
                cb(&entry);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn age(path: &Path, days: u64) {
        let file = File::options().write(true).open(path).unwrap();
        let when = SystemTime::now() - Duration::from_secs(days * SECONDS_PER_DAY);
        file.set_modified(when).unwrap();
    }

    #[test]
    fn sweep_deletes_only_expired_files() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let day = dir.path().join("2024/01/01/thumbnails");
        fs::create_dir_all(&day).unwrap();
        let old = dir.path().join("2024/01/01/old.jpg");
        let old_thumb = day.join("thumb_old.jpg");
        let fresh = dir.path().join("2024/01/01/fresh.jpg");
        let log = dir.path().join(LOG_FILE);
        for f in [&old, &old_thumb, &fresh, &log] {
            fs::write(f, b"x").unwrap();
        }
        age(&old, 31);
        age(&old_thumb, 40);
        age(&log, 90);
        let sweeper = RetentionSweeper::new(dir.path(), 30);

        // Act
        let deleted = sweeper.sweep().unwrap();

        // Assert
        assert_eq!(deleted, 2);
        assert!(!old.exists());
        assert!(!old_thumb.exists());
        assert!(fresh.exists());
        assert!(log.exists());
    }

    #[test]
    fn sweep_of_missing_root_is_noop() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let sweeper = RetentionSweeper::new(dir.path().join("absent"), 30);

        // Act
        let deleted = sweeper.sweep().unwrap();

        // Assert
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_on_interval() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old.png");
        fs::write(&old, b"x").unwrap();
        age(&old, 10);
        let sweeper = RetentionSweeper::new(dir.path(), 1);

        // Act
        let handle = sweeper.spawn(Duration::from_secs(60));
        for _ in 0..50 {
            if !old.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        // Assert
        assert!(!old.exists());
    }
}
