//! FileService: the durable side of the host: finalized files on disk under
//! `base_path/<id>` plus one `stored_files` row each.
//!
//! New files are written through a [`FileWriter`], which streams into a temp
//! file, hashes as it goes and only becomes visible under its public id once
//! [`FileWriter::commit`] has synced, renamed and registered it.

use crate::{
    models::{stored_file::StoredFile, upload::StorageStats},
    services::naming::{content_type_for, generate_file_id, is_safe_component},
};
use chrono::Utc;
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("invalid file id")]
    InvalidId,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type FileResult<T> = Result<T, FileError>;

#[derive(Clone)]
pub struct FileService {
    /// Shared SQLite connection pool used for the file registry.
    pub db: Arc<SqlitePool>,

    /// Directory holding finalized files.
    pub base_path: PathBuf,
}

impl FileService {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    fn ensure_id_safe(&self, id: &str) -> FileResult<()> {
        if is_safe_component(id) {
            Ok(())
        } else {
            Err(FileError::InvalidId)
        }
    }

    pub fn file_path(&self, id: &str) -> PathBuf {
        self.base_path.join(id)
    }

    /// Start writing a new file that will be published under a fresh id.
    pub async fn create_writer(&self, original_name: &str) -> FileResult<FileWriter> {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = File::create(&tmp_path).await?;
        let tmp = RemoveOnDrop::new(tmp_path);
        Ok(FileWriter {
            service: self.clone(),
            id: generate_file_id(original_name),
            original_name: original_name.to_string(),
            file: BufWriter::new(file),
            tmp,
            size_bytes: 0,
            digest: Context::new(),
        })
    }

    async fn register(&self, file: &StoredFile) -> FileResult<()> {
        sqlx::query(
            "INSERT INTO stored_files (id, original_name, content_type, size_bytes, checksum, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&file.id)
        .bind(&file.original_name)
        .bind(&file.content_type)
        .bind(file.size_bytes)
        .bind(&file.checksum)
        .bind(file.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> FileResult<StoredFile> {
        self.ensure_id_safe(id)?;
        sqlx::query_as::<_, StoredFile>(
            "SELECT id, original_name, content_type, size_bytes, checksum, created_at
             FROM stored_files WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => FileError::NotFound(id.to_string()),
            other => FileError::Sqlx(other),
        })
    }

    /// Registry row plus an open handle for streaming the content out.
    pub async fn open(&self, id: &str) -> FileResult<(StoredFile, File)> {
        let meta = self.get(id).await?;
        let file = File::open(self.file_path(id)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                FileError::NotFound(id.to_string())
            } else {
                FileError::Io(err)
            }
        })?;
        Ok((meta, file))
    }

    pub async fn stats(&self, total_storage: u64) -> FileResult<StorageStats> {
        let (count, used): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM stored_files",
        )
        .fetch_one(&*self.db)
        .await?;
        let used = used.max(0) as u64;
        Ok(StorageStats {
            total_files: count.max(0) as u64,
            used_storage: used,
            available_storage: total_storage.saturating_sub(used),
            total_storage,
        })
    }
}

/// Removes a path when dropped unless disarmed. Covers futures that are
/// cancelled between creating a file and publishing it.
struct RemoveOnDrop {
    path: Option<PathBuf>,
}

impl RemoveOnDrop {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("removed unfinished file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove {}: {}", path.display(), err),
        }
    }
}

/// An in-progress file. If it is dropped before [`FileWriter::commit`]
/// finishes (an error, an explicit [`FileWriter::abort`] or a cancelled
/// request) the temp file is removed.
pub struct FileWriter {
    service: FileService,
    id: String,
    original_name: String,
    // Declared before `tmp` so the handle is closed before the file is removed.
    file: BufWriter<File>,
    tmp: RemoveOnDrop,
    size_bytes: u64,
    digest: Context,
}

impl FileWriter {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.digest.consume(bytes);
        self.file.write_all(bytes).await?;
        self.size_bytes += bytes.len() as u64;
        Ok(())
    }

    /// Sync, publish under the final id and insert the registry row.
    ///
    /// On failure or cancellation nothing stays visible: the temp or
    /// published file is removed.
    pub async fn commit(mut self) -> FileResult<StoredFile> {
        self.sync().await?;

        let final_path = self.service.file_path(&self.id);
        fs::rename(self.tmp.path(), &final_path).await?;
        self.tmp.disarm();
        let mut published = RemoveOnDrop::new(final_path);

        let stored = StoredFile {
            content_type: content_type_for(&self.id).to_string(),
            id: self.id,
            original_name: self.original_name,
            size_bytes: i64::try_from(self.size_bytes).unwrap_or(i64::MAX),
            checksum: format!("{:x}", self.digest.compute()),
            created_at: Utc::now(),
        };

        self.service.register(&stored).await?;
        published.disarm();

        info!(id = %stored.id, size = stored.size_bytes, "stored file");
        Ok(stored)
    }

    /// Throw away everything written so far.
    pub async fn abort(self) {
        drop(self);
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.get_mut().sync_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn service(dir: &std::path::Path) -> FileService {
        let pool = db::memory_pool().await.unwrap();
        FileService::new(Arc::new(pool), dir)
    }

    #[tokio::test]
    async fn committed_file_is_registered_and_readable() {
        let tmp = tempfile::tempdir().unwrap();
        let files = service(tmp.path()).await;

        let mut writer = files.create_writer("notes.TXT").await.unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        let stored = writer.commit().await.unwrap();

        assert!(stored.id.ends_with(".txt"));
        assert_eq!(stored.size_bytes, 11);
        assert_eq!(stored.checksum, format!("{:x}", md5::compute(b"hello world")));
        assert_eq!(stored.content_type, "text/plain; charset=utf-8");
        assert_eq!(
            std::fs::read(files.file_path(&stored.id)).unwrap(),
            b"hello world"
        );

        let fetched = files.get(&stored.id).await.unwrap();
        assert_eq!(fetched.original_name, "notes.TXT");

        let stats = files.stats(100).await.unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.used_storage, 11);
        assert_eq!(stats.available_storage, 89);
    }

    #[tokio::test]
    async fn aborted_writer_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let files = service(tmp.path()).await;

        let mut writer = files.create_writer("a.bin").await.unwrap();
        writer.write(b"partial").await.unwrap();
        writer.abort().await;

        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        assert_eq!(files.stats(0).await.unwrap().total_files, 0);
    }

    #[tokio::test]
    async fn dropped_writer_removes_its_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let files = service(tmp.path()).await;

        let mut writer = files.create_writer("cut.mp4").await.unwrap();
        writer.write(b"half a video").await.unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
        drop(writer);

        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unknown_and_unsafe_ids_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let files = service(tmp.path()).await;

        assert!(matches!(files.get("nope.png").await, Err(FileError::NotFound(_))));
        assert!(matches!(files.get("../etc/passwd").await, Err(FileError::InvalidId)));
    }
}
