//! Upload log persisted as a single pretty printed JSON array.
//!
//! Every operation holds an advisory lock on the log file for its whole
//! read-modify-write cycle. Locks block without timeout, so call these
//! methods from blocking threads only.

use std::fs::{self, DirEntry, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use kernel::UploadRecord;
use serde_json::Value;
use thiserror::Error;

use crate::domain::UploadLog;
use crate::retention::visit_files;
use crate::thumbnail::{THUMBNAIL_DIR, THUMBNAIL_PREFIX};

pub const LOG_FILE: &str = "upload_log.json";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("upload log I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("upload log encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct JsonLog {
    root: PathBuf,
    path: PathBuf,
    cap: usize,
}

impl JsonLog {
    /// Log stored as `root/upload_log.json`, keeping at most `cap` records.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P, cap: usize) -> Self {
        let root = root.into();
        let path = root.join(LOG_FILE);
        Self {
            root,
            path,
            cap: cap.max(1),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_locked(&self) -> io::Result<File> {
        fs::create_dir_all(&self.root)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock()?;
        Ok(file)
    }

    /// Removes a file the log points to, refusing anything outside the upload root.
    fn remove_stored(&self, path: &Path) {
        if !within_root(path, &self.root) {
            tracing::warn!("refusing to delete {} outside of upload root", path.display());
            return;
        }
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!("removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!("cannot remove {}: {e}", path.display()),
        }
    }
}

impl UploadLog for JsonLog {
    type Err = LogError;

    fn append(&self, record: &UploadRecord) -> Result<(), Self::Err> {
        let mut file = self.open_locked()?;
        let mut entries = read_entries(&mut file);
        entries.push(serde_json::to_value(record)?);
        if entries.len() > self.cap {
            let excess = entries.len() - self.cap;
            entries.drain(..excess);
            tracing::debug!("upload log capped, {excess} oldest entries dropped");
        }
        write_entries(&mut file, &entries)
    }

    fn load_all(&self) -> Result<Vec<UploadRecord>, Self::Err> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(&self.path)?;
        file.lock_shared()?;
        let records = read_entries(&mut file)
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<UploadRecord>(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("skipping malformed upload log entry: {e}");
                    None
                }
            })
            .collect();
        Ok(records)
    }

    fn delete_by_id(&self, id: &str) -> Result<bool, Self::Err> {
        if !self.path.exists() {
            return Ok(false);
        }
        let mut file = self.open_locked()?;
        let mut entries = read_entries(&mut file);
        let Some(ix) = entries
            .iter()
            .position(|entry| entry.get("id").and_then(Value::as_str) == Some(id))
        else {
            return Ok(false);
        };

        let entry = entries.remove(ix);
        if let Some(original) = entry.get("path").and_then(Value::as_str) {
            let original = Path::new(original);
            self.remove_stored(original);
            let filename = entry
                .get("filename")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .or_else(|| {
                    original
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(ToOwned::to_owned)
                });
            if let (Some(dir), Some(filename)) = (original.parent(), filename) {
                self.remove_stored(&dir.join(THUMBNAIL_DIR).join(format!("{THUMBNAIL_PREFIX}{filename}")));
            }
        }

        write_entries(&mut file, &entries)?;
        Ok(true)
    }

    fn clear_all(&self) -> Result<usize, Self::Err> {
        let mut file = self.open_locked()?;
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path == self.path {
                continue;
            }
            if path.is_dir() {
                visit_files(&path, &mut |_: &DirEntry| removed += 1)?;
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        write_entries(&mut file, &[])?;
        Ok(removed)
    }
}

/// Lexical containment check. Parent components are refused outright since
/// `root/../x` starts with `root` but points outside of it.
pub(crate) fn within_root(path: &Path, root: &Path) -> bool {
    path.starts_with(root) && !path.components().any(|c| c == Component::ParentDir)
}

/// Current log content. Unreadable or corrupt content reads as an empty log.
fn read_entries(file: &mut File) -> Vec<Value> {
    let mut content = String::new();
    if let Err(e) = file.read_to_string(&mut content) {
        tracing::warn!("cannot read upload log, starting empty: {e}");
        return Vec::new();
    }
    if content.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<Value>>(&content) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("corrupt upload log, starting empty: {e}");
            Vec::new()
        }
    }
}

fn write_entries(file: &mut File, entries: &[Value]) -> Result<(), LogError> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    {
        let mut writer = BufWriter::new(&*file);
        serde_json::to_writer_pretty(&mut writer, entries)?;
        writer.flush()?;
    }
    file.sync_data()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use kernel::UNKNOWN;
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    pub fn record(root: &Path, n: i64) -> UploadRecord {
        let id = format!("{n:08x}");
        let filename = format!("photobox_2025-01-01_10-00-00_{id}.png");
        UploadRecord {
            id,
            filename: filename.clone(),
            original_name: "booth.png".to_owned(),
            size_bytes: 42,
            mime_type: "image/png".to_owned(),
            storage_path: root.join("2025/01/01").join(&filename).to_string_lossy().into_owned(),
            url: format!("http://localhost/uploads/2025/01/01/{filename}"),
            thumbnail_url: None,
            uploaded_at: NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
                + Duration::seconds(n),
            client_ip: UNKNOWN.to_owned(),
            user_agent: UNKNOWN.to_owned(),
            metadata: None,
        }
    }

    #[test]
    fn load_missing_log_is_empty() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let log = JsonLog::new(dir.path(), 10);

        // Act
        let records = log.load_all().unwrap();

        // Assert
        assert!(records.is_empty());
    }

    #[test]
    fn append_keeps_insertion_order() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let log = JsonLog::new(dir.path(), 10);

        // Act
        for n in [3, 1, 2] {
            log.append(&record(dir.path(), n)).unwrap();
        }

        // Assert
        let ids: Vec<String> = log.load_all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["00000003", "00000001", "00000002"]);
    }

    #[test]
    fn append_over_cap_keeps_most_recent() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let cap = 5;
        let log = JsonLog::new(dir.path(), cap);

        // Act
        for n in 0..=(cap as i64) {
            log.append(&record(dir.path(), n)).unwrap();
        }

        // Assert
        let records = log.load_all().unwrap();
        assert_eq!(records.len(), cap);
        let ids: Vec<String> = records.into_iter().map(|r| r.id).collect();
        let expected: Vec<String> = (1..=(cap as i64)).map(|n| format!("{n:08x}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn append_over_corrupt_log_starts_fresh() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let log = JsonLog::new(dir.path(), 10);
        fs::write(log.path(), "{ this is not json").unwrap();

        // Act
        log.append(&record(dir.path(), 1)).unwrap();

        // Assert
        assert_eq!(log.load_all().unwrap().len(), 1);
    }

    #[test]
    fn foreign_entries_survive_append_but_are_not_loaded() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let log = JsonLog::new(dir.path(), 10);
        fs::write(log.path(), r#"[{"id": "legacy"}]"#).unwrap();

        // Act
        log.append(&record(dir.path(), 1)).unwrap();

        // Assert
        assert_eq!(log.load_all().unwrap().len(), 1);
        let raw: Vec<Value> = serde_json::from_str(&fs::read_to_string(log.path()).unwrap()).unwrap();
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn delete_unknown_id_leaves_log_unchanged() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let log = JsonLog::new(dir.path(), 10);
        log.append(&record(dir.path(), 1)).unwrap();
        let before = fs::read_to_string(log.path()).unwrap();

        // Act
        let deleted = log.delete_by_id("nope").unwrap();

        // Assert
        assert!(!deleted);
        assert_eq!(fs::read_to_string(log.path()).unwrap(), before);
    }

    #[test]
    fn delete_removes_record_original_and_thumbnail() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let log = JsonLog::new(dir.path(), 10);
        let r = record(dir.path(), 7);
        let original = PathBuf::from(&r.storage_path);
        let day_dir = original.parent().unwrap();
        let thumbnail = day_dir.join("thumbnails").join(format!("thumb_{}", r.filename));
        fs::create_dir_all(thumbnail.parent().unwrap()).unwrap();
        fs::write(&original, b"x").unwrap();
        fs::write(&thumbnail, b"x").unwrap();
        log.append(&r).unwrap();
        log.append(&record(dir.path(), 8)).unwrap();

        // Act
        let deleted = log.delete_by_id(&r.id).unwrap();

        // Assert
        assert!(deleted);
        assert!(!original.exists());
        assert!(!thumbnail.exists());
        let ids: Vec<String> = log.load_all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["00000008"]);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    #[trace]
    fn delete_never_touches_files_outside_root(#[case] through_parent: bool) {
        // Arrange
        let parent = TempDir::new().unwrap();
        let dir = parent.path().join("uploads");
        fs::create_dir_all(&dir).unwrap();
        let outside = TempDir::new().unwrap();
        let victim = if through_parent {
            parent.path().join("keep.png")
        } else {
            outside.path().join("keep.png")
        };
        fs::write(&victim, b"x").unwrap();
        let log = JsonLog::new(&dir, 10);
        let mut r = record(&dir, 1);
        r.storage_path = if through_parent {
            dir.join("..").join("keep.png").to_string_lossy().into_owned()
        } else {
            victim.to_string_lossy().into_owned()
        };
        log.append(&r).unwrap();

        // Act
        let deleted = log.delete_by_id(&r.id).unwrap();

        // Assert
        assert!(deleted);
        assert!(victim.exists());
    }

    #[test]
    fn clear_all_empties_directory_and_log() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let log = JsonLog::new(dir.path(), 10);
        let day_dir = dir.path().join("2025/01/01/thumbnails");
        fs::create_dir_all(&day_dir).unwrap();
        fs::write(day_dir.join("thumb_a.png"), b"x").unwrap();
        fs::write(dir.path().join("2025/01/01/a.png"), b"x").unwrap();
        fs::write(dir.path().join("stray.txt"), b"x").unwrap();
        log.append(&record(dir.path(), 1)).unwrap();

        // Act
        let removed = log.clear_all().unwrap();

        // Assert
        assert_eq!(removed, 3);
        assert!(log.load_all().unwrap().is_empty());
        let mut remaining = Vec::new();
        visit_files(dir.path(), &mut |e: &DirEntry| remaining.push(e.path())).unwrap();
        assert_eq!(remaining, vec![log.path().to_path_buf()]);
        assert_eq!(fs::read_to_string(log.path()).unwrap().trim(), "[]");
    }

    #[rstest]
    #[case("/srv/uploads/2025/01/01/a.png", true)]
    #[case("/srv/uploads/2025/../01/a.png", false)]
    #[case("/srv/uploads/../secret.txt", false)]
    #[case("/srv/uploads-old/a.png", false)]
    #[case("/etc/passwd", false)]
    #[trace]
    fn within_root_cases(#[case] path: &str, #[case] expected: bool) {
        // Act
        let result = within_root(Path::new(path), Path::new("/srv/uploads"));

        // Assert
        assert_eq!(result, expected);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let log = Arc::new(JsonLog::new(dir.path(), 1000));
        let threads = 8;
        let per_thread = 25;

        // Act
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let log = Arc::clone(&log);
                let root = dir.path().to_path_buf();
                thread::spawn(move || {
                    for n in 0..per_thread {
                        log.append(&record(&root, t * per_thread + n)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Assert
        let mut ids: Vec<String> = log.load_all().unwrap().into_iter().map(|r| r.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), (threads * per_thread) as usize);
    }
}
