//! UploadService: staging for chunked uploads and assembly into stored files.
//!
//! Layout under `staging_root`:
//!
//! ```text
//! <staging_root>/<staging key>/chunk-0
//! <staging_root>/<staging key>/chunk-1
//! ...
//! ```
//!
//! The staging key is the session id handed out by [`UploadService::begin_session`],
//! or the client's filename for clients that skip the session step. Fragments
//! may arrive in any order and a rewrite of the same index replaces the old
//! bytes; ordering is decided only at finalize time, numerically by index.

use crate::{
    models::stored_file::StoredFile,
    services::{
        file_service::{FileError, FileService, FileWriter},
        naming::is_safe_component,
    },
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const FRAGMENT_PREFIX: &str = "chunk-";
/// Read buffer used while assembling, so peak memory stays at one buffer.
const COPY_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload key `{0}`")]
    InvalidStagingKey(String),
    #[error("upload `{0}` not found")]
    SessionNotFound(String),
    #[error("upload has no chunks")]
    NoFragments,
    #[error("incomplete upload: expected {expected} chunks, missing {missing:?}")]
    Incomplete { expected: u32, missing: Vec<u32> },
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// One staged fragment, as found on disk.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub index: u32,
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Clone)]
pub struct UploadService {
    /// Parent of every staging directory.
    pub staging_root: PathBuf,

    /// Cap on one upload's total size, enforced while staging and assembling.
    pub max_upload_bytes: u64,

    pub files: FileService,
}

impl UploadService {
    pub fn new(
        staging_root: impl Into<PathBuf>,
        max_upload_bytes: u64,
        files: FileService,
    ) -> Self {
        Self {
            staging_root: staging_root.into(),
            max_upload_bytes,
            files,
        }
    }

    /// Open a staging session and return its id.
    pub async fn begin_session(&self, filename: &str, total_size: Option<u64>) -> UploadResult<String> {
        if let Some(size) = total_size {
            self.ensure_within_limit(size)?;
        }
        let upload_id = Uuid::new_v4().simple().to_string();
        fs::create_dir_all(self.staging_root.join(&upload_id)).await?;
        info!(upload_id = %upload_id, filename, ?total_size, "upload session started");
        Ok(upload_id)
    }

    /// Resolve the staging directory for a request.
    ///
    /// Session ids must parse as UUIDs and refer to an existing directory.
    /// Filename keys must be a safe path component that does not itself parse
    /// as a UUID, so they can never land in a session's directory.
    fn staging_dir(&self, upload_id: Option<&str>, filename: &str) -> UploadResult<(PathBuf, bool)> {
        match upload_id {
            Some(id) => {
                let id = Uuid::parse_str(id)
                    .map_err(|_| UploadError::InvalidStagingKey(id.to_string()))?;
                Ok((self.staging_root.join(id.simple().to_string()), true))
            }
            None if is_safe_component(filename) && Uuid::parse_str(filename).is_err() => {
                Ok((self.staging_root.join(filename), false))
            }
            None => Err(UploadError::InvalidStagingKey(filename.to_string())),
        }
    }

    fn ensure_within_limit(&self, size: u64) -> UploadResult<()> {
        if size > self.max_upload_bytes {
            Err(UploadError::TooLarge {
                limit: self.max_upload_bytes,
            })
        } else {
            Ok(())
        }
    }

    /// Persist one fragment, replacing any earlier fragment at `index`.
    pub async fn write_chunk(
        &self,
        upload_id: Option<&str>,
        filename: &str,
        index: u32,
        data: Bytes,
    ) -> UploadResult<()> {
        let (dir, is_session) = self.staging_dir(upload_id, filename)?;
        if is_session {
            if !fs::try_exists(&dir).await? {
                return Err(UploadError::SessionNotFound(upload_id.unwrap_or_default().to_string()));
            }
        } else {
            fs::create_dir_all(&dir).await?;
        }

        let staged: u64 = list_fragments(&dir)
            .await?
            .iter()
            .filter(|f| f.index != index)
            .map(|f| f.size_bytes)
            .sum();
        self.ensure_within_limit(staged + data.len() as u64)?;

        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = write_durably(&tmp_path, &data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp_path, fragment_path(&dir, index)).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        debug!(dir = %dir.display(), index, size = data.len(), "stored chunk");
        Ok(())
    }

    /// Concatenate the staged fragments into one stored file and drop the
    /// staging directory.
    ///
    /// With `total_chunks` the fragment indices must be exactly
    /// `0..total_chunks`; without it whatever is staged is trusted. On any
    /// failure the staging directory is left as it was.
    pub async fn finalize(
        &self,
        upload_id: Option<&str>,
        filename: &str,
        total_chunks: Option<u32>,
    ) -> UploadResult<StoredFile> {
        let (dir, _) = self.staging_dir(upload_id, filename)?;
        let fragments = match list_fragments(&dir).await {
            Ok(fragments) => fragments,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let key = upload_id.unwrap_or(filename);
                return Err(UploadError::SessionNotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        if fragments.is_empty() {
            return Err(UploadError::NoFragments);
        }
        if let Some(expected) = total_chunks {
            ensure_complete(&fragments, expected)?;
        }
        self.ensure_within_limit(fragments.iter().map(|f| f.size_bytes).sum())?;

        let mut writer = self.files.create_writer(filename).await?;
        for fragment in &fragments {
            if let Err(err) = append_fragment(&mut writer, &fragment.path).await {
                writer.abort().await;
                return Err(err.into());
            }
        }
        let stored = writer.commit().await?;

        if let Err(err) = fs::remove_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %err, "stored file but could not remove staging directory");
        }

        info!(
            id = %stored.id,
            chunks = fragments.len(),
            size = stored.size_bytes,
            "upload finalized"
        );
        Ok(stored)
    }

    /// Stream a single-request upload straight into a stored file.
    pub async fn store_stream<S>(&self, original_name: &str, stream: S) -> UploadResult<StoredFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let mut writer = self.files.create_writer(original_name).await?;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let result = match chunk_res {
                Ok(chunk) => {
                    if writer.size_bytes() + chunk.len() as u64 > self.max_upload_bytes {
                        Err(UploadError::TooLarge {
                            limit: self.max_upload_bytes,
                        })
                    } else {
                        writer.write(&chunk).await.map_err(UploadError::from)
                    }
                }
                Err(err) => Err(UploadError::Io(err)),
            };
            if let Err(err) = result {
                writer.abort().await;
                return Err(err);
            }
        }
        Ok(writer.commit().await?)
    }
}

fn fragment_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("{}{}", FRAGMENT_PREFIX, index))
}

fn parse_fragment_index(name: &str) -> Option<u32> {
    name.strip_prefix(FRAGMENT_PREFIX)?.parse().ok()
}

/// Fragments in `dir`, sorted by index. Temp files and anything else that is
/// not `chunk-<n>` are skipped.
pub async fn list_fragments(dir: &Path) -> io::Result<Vec<Fragment>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut fragments = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(parse_fragment_index) else {
            continue;
        };
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        fragments.push(Fragment {
            index,
            path: entry.path(),
            size_bytes: meta.len(),
        });
    }
    fragments.sort_by_key(|f| f.index);
    Ok(fragments)
}

/// Indices must be exactly `0..expected`, no gaps and no extras.
fn ensure_complete(fragments: &[Fragment], expected: u32) -> UploadResult<()> {
    let contiguous = fragments.len() == expected as usize
        && fragments.iter().zip(0..).all(|(f, i)| f.index == i);
    if contiguous {
        return Ok(());
    }
    let missing = (0..expected)
        .filter(|i| fragments.binary_search_by_key(i, |f| f.index).is_err())
        .collect::<Vec<_>>();
    Err(UploadError::Incomplete { expected, missing })
}

async fn write_durably(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

async fn append_fragment(writer: &mut FileWriter, path: &Path) -> io::Result<()> {
    let mut file = File::open(path).await?;
    let mut buf = vec![0u8; COPY_BUFFER_BYTES];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write(&buf[..n]).await?;
    }
}
