//! Thumbnail derivation for uploaded images.
//!
//! A job is validated against the metadata store, then each width in
//! [`THUMBNAIL_WIDTHS`] is rendered and written next to the original as
//! `{localPath}_{width}`. Widths are derived independently; any failure is
//! reported after all of them were attempted. Variants are replaced
//! atomically, so running a job twice is harmless.

use crate::{
    models::{
        file::{FileRecord, FileType},
        job::ThumbnailJob,
    },
    services::blob_store::{BlobError, BlobStore},
    stores::{FileFilter, MetadataStore, StoreError},
};
use image::{DynamicImage, ImageFormat, imageops::FilterType};
use std::{
    io::{self, Cursor},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Widths, in pixels, of the variants derived for every image.
pub const THUMBNAIL_WIDTHS: [u32; 3] = [500, 250, 100];

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("renderer produced no data")]
    Empty,
}

/// Renders image bytes at a target width.
pub trait Thumbnailer: Send + Sync {
    fn render(&self, source: &[u8], width: u32) -> Result<Vec<u8>, ThumbnailError>;
}

/// Renderer backed by the `image` crate.
///
/// Keeps the aspect ratio. JPEG sources stay JPEG; everything else is
/// written as PNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageThumbnailer;

impl Thumbnailer for ImageThumbnailer {
    fn render(&self, source: &[u8], width: u32) -> Result<Vec<u8>, ThumbnailError> {
        let format = image::guess_format(source).ok();
        let img = image::load_from_memory(source)?;

        let height = (u64::from(img.height()) * u64::from(width) / u64::from(img.width().max(1)))
            .clamp(1, u64::from(u32::MAX)) as u32;
        let resized = img.resize_exact(width, height, FilterType::Triangle);

        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);
        match format {
            Some(ImageFormat::Jpeg) => DynamicImage::ImageRgb8(resized.to_rgb8())
                .write_to(&mut cursor, ImageFormat::Jpeg)?,
            _ => resized.write_to(&mut cursor, ImageFormat::Png)?,
        }

        if buf.is_empty() {
            return Err(ThumbnailError::Empty);
        }
        Ok(buf)
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("malformed job payload: {0}")]
    MalformedPayload(String),
    #[error("Missing {0}")]
    MissingField(&'static str),
    #[error("file {file_id} of user {user_id} not found")]
    RecordNotFound { file_id: String, user_id: String },
    #[error("blob `{0}` missing on disk")]
    BlobMissing(String),
    #[error("thumbnail derivation failed: {}", .0.join("; "))]
    Derivation(Vec<String>),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WorkerError {
    /// Failures that no retry can fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WorkerError::MalformedPayload(_)
                | WorkerError::MissingField(_)
                | WorkerError::RecordNotFound { .. }
                | WorkerError::BlobMissing(_)
        )
    }
}

impl From<BlobError> for WorkerError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(path) => WorkerError::BlobMissing(path),
            BlobError::Io(err) => WorkerError::Io(err),
        }
    }
}

/// Result of a successfully processed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Variants written, one per width.
    Derived(Vec<PathBuf>),
    /// The record is not an image; nothing to do.
    Skipped,
}

#[derive(Clone)]
pub struct ThumbnailWorker {
    metadata: Arc<dyn MetadataStore>,
    thumbnailer: Arc<dyn Thumbnailer>,
}

impl ThumbnailWorker {
    pub fn new(metadata: Arc<dyn MetadataStore>, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        Self {
            metadata,
            thumbnailer,
        }
    }

    /// Decode a queued payload and process it.
    pub async fn process_payload(&self, payload: &str) -> Result<JobOutcome, WorkerError> {
        let job: ThumbnailJob = serde_json::from_str(payload)
            .map_err(|err| WorkerError::MalformedPayload(err.to_string()))?;
        self.process(&job).await
    }

    pub async fn process(&self, job: &ThumbnailJob) -> Result<JobOutcome, WorkerError> {
        let record = self.validate(job).await?;
        if record.file_type != FileType::Image {
            debug!("file {} is a {}, skipping thumbnails", record.id, record.file_type);
            return Ok(JobOutcome::Skipped);
        }
        self.derive(&record).await.map(JobOutcome::Derived)
    }

    /// Check the payload and load the record it names.
    async fn validate(&self, job: &ThumbnailJob) -> Result<FileRecord, WorkerError> {
        if job.file_id.trim().is_empty() {
            return Err(WorkerError::MissingField("fileId"));
        }
        if job.user_id.trim().is_empty() {
            return Err(WorkerError::MissingField("userId"));
        }

        let not_found = || WorkerError::RecordNotFound {
            file_id: job.file_id.clone(),
            user_id: job.user_id.clone(),
        };
        let file_id = Uuid::parse_str(job.file_id.trim()).map_err(|_| not_found())?;
        self.metadata
            .find_one(&FileFilter::owned(file_id, &job.user_id))
            .await?
            .ok_or_else(not_found)
    }

    async fn derive(&self, record: &FileRecord) -> Result<Vec<PathBuf>, WorkerError> {
        let local_path = record
            .local_path
            .as_deref()
            .ok_or_else(|| WorkerError::BlobMissing(format!("record {}", record.id)))?;
        let source = Arc::new(BlobStore::read(Path::new(local_path)).await?);

        let mut written = Vec::with_capacity(THUMBNAIL_WIDTHS.len());
        let mut failures = Vec::new();
        for width in THUMBNAIL_WIDTHS {
            let thumbnailer = Arc::clone(&self.thumbnailer);
            let source = Arc::clone(&source);
            let rendered =
                tokio::task::spawn_blocking(move || thumbnailer.render(&source, width)).await;

            let bytes = match rendered {
                Ok(Ok(bytes)) if !bytes.is_empty() => bytes,
                Ok(Ok(_)) => {
                    failures.push(format!("{}px: {}", width, ThumbnailError::Empty));
                    continue;
                }
                Ok(Err(err)) => {
                    failures.push(format!("{}px: {}", width, err));
                    continue;
                }
                Err(join_err) => {
                    failures.push(format!("{}px: renderer crashed: {}", width, join_err));
                    continue;
                }
            };

            let target = BlobStore::variant_path(local_path, width);
            match BlobStore::write_atomic(&target, &bytes).await {
                Ok(()) => {
                    debug!("wrote {} ({} bytes)", target.display(), bytes.len());
                    written.push(target);
                }
                Err(err) => failures.push(format!("{}px: {}", width, err)),
            }
        }

        if !failures.is_empty() {
            warn!(
                "thumbnails for {}: {} of {} widths failed",
                record.id,
                failures.len(),
                THUMBNAIL_WIDTHS.len()
            );
            return Err(WorkerError::Derivation(failures));
        }
        Ok(written)
    }
}
