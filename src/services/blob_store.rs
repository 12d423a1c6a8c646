//! Local filesystem storage for file contents.
//!
//! Blobs live flat under `base_path`, each named by a fresh UUID. The
//! user-supplied display name never reaches the filesystem.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Size of the chunks an in-memory payload is written in.
const WRITE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Clone, Debug)]
pub struct BlobStore {
    /// Root directory for blobs and their derived variants.
    pub base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Path of the variant of `local_path` derived at `width` pixels.
    pub fn variant_path(local_path: &str, width: u32) -> PathBuf {
        PathBuf::from(format!("{}_{}", local_path, width))
    }

    /// Store an in-memory payload under a new unique name and return its path.
    pub async fn write(&self, data: Vec<u8>) -> BlobResult<PathBuf> {
        let data = Bytes::from(data);
        let chunks = (0..data.len())
            .step_by(WRITE_CHUNK)
            .map(|start| Ok(data.slice(start..(start + WRITE_CHUNK).min(data.len()))))
            .collect::<Vec<io::Result<Bytes>>>();
        self.write_stream(futures::stream::iter(chunks)).await
    }

    /// Stream a payload to disk under a new unique name.
    ///
    /// - Writes chunks to a temporary file in `base_path`.
    /// - fsyncs, then renames into `{base_path}/{uuid}`.
    ///
    /// The temporary file is removed on any error, so a failed write never
    /// leaves a blob behind.
    pub async fn write_stream<S>(&self, stream: S) -> BlobResult<PathBuf>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs::create_dir_all(&self.base_path).await?;
        let file_path = self.base_path.join(Uuid::new_v4().to_string());
        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BlobError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BlobError::Io(err));
            }
        }
        if let Err(err) = finish(file).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        debug!("stored blob {} ({} bytes)", file_path.display(), size_bytes);
        Ok(file_path)
    }

    /// Write `data` to `path`, replacing any previous content atomically.
    ///
    /// Readers see either the old file or the complete new one.
    pub async fn write_atomic(path: &Path, data: &[u8]) -> BlobResult<()> {
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobError::Io(io::Error::new(ErrorKind::Other, "blob path missing parent directory"))
        })?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            finish(file).await?;
            fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        Ok(())
    }

    /// Read a whole blob into memory.
    pub async fn read(path: &Path) -> BlobResult<Vec<u8>> {
        fs::read(path).await.map_err(|err| not_found_or_io(err, path))
    }

    /// Open a blob for streaming.
    ///
    /// A record may outlive its blob if the file was removed externally, so
    /// a missing file is reported as `NotFound` rather than an I/O failure.
    pub async fn open(path: &Path) -> BlobResult<(File, u64)> {
        let file = File::open(path)
            .await
            .map_err(|err| not_found_or_io(err, path))?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }
}

async fn finish(mut file: File) -> io::Result<()> {
    file.flush().await?;
    file.sync_all().await
}

fn not_found_or_io(err: io::Error, path: &Path) -> BlobError {
    if err.kind() == ErrorKind::NotFound {
        BlobError::NotFound(path.display().to_string())
    } else {
        BlobError::Io(err)
    }
}
