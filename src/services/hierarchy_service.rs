//! HierarchyService: creation, lookup, listing, visibility and download of
//! file and folder records.
//!
//! Every operation starts by resolving the caller from the session store.
//! Records are always addressed together with their owner, so a record the
//! caller may not see is reported exactly like one that does not exist.

use crate::{
    models::{
        file::{FileRecord, FileType, NewFileRecord, ParentId},
        job::ThumbnailJob,
    },
    services::{
        blob_store::{BlobError, BlobStore},
        thumbnail_worker::THUMBNAIL_WIDTHS,
    },
    stores::{
        FileFilter, FileUpdate, JobQueue, MetadataStore, SessionStore, StoreError,
        session_store::session_key,
    },
};
use base64::{Engine as _, engine::general_purpose};
use serde_json::Value;
use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Records returned per `list` page.
pub const PAGE_SIZE: u64 = 20;

#[derive(Debug, Error)]
pub enum HierarchyError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Missing {0}")]
    MissingField(&'static str),
    #[error("Invalid {0}")]
    InvalidField(&'static str),
    #[error("Parent not found")]
    ParentNotFound,
    #[error("Parent is not a folder")]
    ParentNotFolder,
    #[error("Not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<BlobError> for HierarchyError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(_) => HierarchyError::NotFound,
            BlobError::Io(err) => HierarchyError::Io(err),
        }
    }
}

pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Fields of a create request, as received.
#[derive(Clone, Debug, Default)]
pub struct CreateFile {
    pub name: Option<String>,
    pub file_type: Option<String>,
    /// `0`, `"0"` or a folder id; absent means root.
    pub parent_id: Option<Value>,
    pub is_public: Option<bool>,
    /// Base64-encoded content, required unless creating a folder.
    pub data: Option<String>,
}

/// An open blob ready to be streamed to the caller.
#[derive(Debug)]
pub struct Download {
    pub file: File,
    pub len: u64,
    pub content_type: String,
}

#[derive(Clone)]
pub struct HierarchyService {
    pub sessions: Arc<dyn SessionStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub blobs: BlobStore,
}

impl HierarchyService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        metadata: Arc<dyn MetadataStore>,
        jobs: Arc<dyn JobQueue>,
        blobs: BlobStore,
    ) -> Self {
        Self {
            sessions,
            metadata,
            jobs,
            blobs,
        }
    }

    /// Resolve the user behind `token`.
    pub async fn authenticate(&self, token: Option<&str>) -> HierarchyResult<String> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(HierarchyError::Unauthorized)?;
        self.sessions
            .get(&session_key(token))
            .await?
            .ok_or(HierarchyError::Unauthorized)
    }

    /// Create a folder, or store content and create a file/image record.
    ///
    /// The blob is on disk before the record references it, and the record
    /// exists before a thumbnail job names it. Enqueueing is best effort:
    /// a queue failure is logged and the upload still succeeds.
    pub async fn create(&self, token: Option<&str>, req: CreateFile) -> HierarchyResult<FileRecord> {
        let user_id = self.authenticate(token).await?;

        let name = req
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(HierarchyError::MissingField("name"))?;
        let file_type = req
            .file_type
            .filter(|t| !t.is_empty())
            .ok_or(HierarchyError::MissingField("type"))?
            .parse::<FileType>()
            .map_err(|_| HierarchyError::InvalidField("type"))?;
        let data = req.data.filter(|d| !d.is_empty());
        if file_type.has_content() && data.is_none() {
            return Err(HierarchyError::MissingField("data"));
        }

        let parent_id = match &req.parent_id {
            None => ParentId::Root,
            Some(raw) => ParentId::from_json(raw).ok_or(HierarchyError::ParentNotFound)?,
        };
        self.ensure_parent_folder(&user_id, parent_id).await?;

        let mut new_record = NewFileRecord {
            user_id: user_id.clone(),
            name,
            file_type,
            is_public: req.is_public.unwrap_or(false),
            parent_id,
            local_path: None,
        };

        let Some(data) = data.filter(|_| file_type.has_content()) else {
            let record = self.metadata.insert(new_record).await?;
            info!("created folder {} for user {}", record.id, user_id);
            return Ok(record);
        };

        let bytes = general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|_| HierarchyError::InvalidField("data"))?;
        let blob_path = self.blobs.write(bytes).await?;
        new_record.local_path = Some(blob_path.to_string_lossy().into_owned());

        let record = match self.metadata.insert(new_record).await {
            Ok(record) => record,
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(&blob_path).await {
                    warn!(
                        "orphaned blob {} left after failed insert: {}",
                        blob_path.display(),
                        cleanup
                    );
                }
                return Err(err.into());
            }
        };
        info!(
            "created {} {} for user {} at {}",
            record.file_type,
            record.id,
            user_id,
            blob_path.display()
        );

        if record.file_type == FileType::Image {
            let job = ThumbnailJob::new(record.id, &user_id);
            match self.jobs.enqueue(&job).await {
                Ok(job_id) => debug!("queued thumbnails for {} as job {}", record.id, job_id),
                Err(err) => error!("failed to queue thumbnails for {}: {}", record.id, err),
            }
        }

        Ok(record)
    }

    /// A record owned by the caller.
    pub async fn get_one(&self, token: Option<&str>, id: &str) -> HierarchyResult<FileRecord> {
        let user_id = self.authenticate(token).await?;
        let id = parse_id(id)?;
        self.metadata
            .find_one(&FileFilter::owned(id, &user_id))
            .await?
            .ok_or(HierarchyError::NotFound)
    }

    /// One page of the caller's records under `parent_id`, in insertion order.
    ///
    /// A parent that matches nothing yields an empty page.
    pub async fn list(
        &self,
        token: Option<&str>,
        parent_id: Option<&str>,
        page: Option<&str>,
    ) -> HierarchyResult<Vec<FileRecord>> {
        let user_id = self.authenticate(token).await?;
        let page = match page.map(str::trim).filter(|p| !p.is_empty()) {
            None => 0,
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| HierarchyError::InvalidField("page"))?,
        };
        let Some(parent_id) = ParentId::parse(parent_id.unwrap_or("0")) else {
            return Ok(Vec::new());
        };
        let Some(skip) = page
            .checked_mul(PAGE_SIZE)
            .filter(|skip| i64::try_from(*skip).is_ok())
        else {
            return Ok(Vec::new());
        };

        let records = self
            .metadata
            .find(&FileFilter::children(&user_id, parent_id), skip, PAGE_SIZE)
            .await?;
        Ok(records)
    }

    pub async fn publish(&self, token: Option<&str>, id: &str) -> HierarchyResult<FileRecord> {
        self.set_visibility(token, id, true).await
    }

    pub async fn unpublish(&self, token: Option<&str>, id: &str) -> HierarchyResult<FileRecord> {
        self.set_visibility(token, id, false).await
    }

    /// Open the content of a record, or of one of its thumbnails when `size`
    /// is given.
    ///
    /// Readable when the record is public or the caller owns it. Everything
    /// else, including a valid session of another user, is `NotFound`.
    pub async fn download(
        &self,
        token: Option<&str>,
        id: &str,
        size: Option<&str>,
    ) -> HierarchyResult<Download> {
        let width = match size.map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => Some(
                raw.parse::<u32>()
                    .ok()
                    .filter(|w| THUMBNAIL_WIDTHS.contains(w))
                    .ok_or(HierarchyError::InvalidField("size"))?,
            ),
        };

        let viewer = match self.authenticate(token).await {
            Ok(user_id) => Some(user_id),
            Err(HierarchyError::Unauthorized) => None,
            Err(err) => return Err(err),
        };

        let id = parse_id(id)?;
        let record = self
            .metadata
            .find_one(&FileFilter::by_id(id))
            .await?
            .ok_or(HierarchyError::NotFound)?;

        if !record.is_public && viewer.as_deref() != Some(record.user_id.as_str()) {
            return Err(HierarchyError::NotFound);
        }
        let local_path = match (&record.file_type, &record.local_path) {
            (FileType::Folder, _) | (_, None) => return Err(HierarchyError::NotFound),
            (_, Some(path)) => path.clone(),
        };

        let path = match width {
            Some(width) => BlobStore::variant_path(&local_path, width),
            None => PathBuf::from(&local_path),
        };
        let (file, len) = BlobStore::open(&path).await?;
        let content_type = mime_guess::from_path(&record.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Download {
            file,
            len,
            content_type,
        })
    }

    async fn set_visibility(
        &self,
        token: Option<&str>,
        id: &str,
        is_public: bool,
    ) -> HierarchyResult<FileRecord> {
        let user_id = self.authenticate(token).await?;
        let id = parse_id(id)?;
        let record = self
            .metadata
            .update_one(&FileFilter::owned(id, &user_id), FileUpdate { is_public })
            .await?
            .ok_or(HierarchyError::NotFound)?;
        debug!("record {} is_public={}", record.id, record.is_public);
        Ok(record)
    }

    /// The parent must be root or an existing folder of the same user.
    async fn ensure_parent_folder(&self, user_id: &str, parent_id: ParentId) -> HierarchyResult<()> {
        let Some(folder_id) = parent_id.folder_id() else {
            return Ok(());
        };
        let parent = self
            .metadata
            .find_one(&FileFilter::owned(folder_id, user_id))
            .await?
            .ok_or(HierarchyError::ParentNotFound)?;
        if parent.file_type != FileType::Folder {
            return Err(HierarchyError::ParentNotFolder);
        }
        Ok(())
    }
}

/// Ids that are not well formed cannot name any record.
fn parse_id(raw: &str) -> HierarchyResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| HierarchyError::NotFound)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        db::connect_in_memory,
        models::job::QueueStats,
        services::thumbnail_worker::{ImageThumbnailer, ThumbnailWorker, tests::png_bytes},
        stores::{SqliteJobQueue, SqliteMetadataStore, SqliteSessionStore, StoreResult},
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::{path::Path, time::Duration};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    pub(crate) struct Fixture {
        pub service: HierarchyService,
        pub sessions: SqliteSessionStore,
        pub queue: SqliteJobQueue,
        pub metadata: Arc<SqliteMetadataStore>,
        pub dir: TempDir,
    }

    impl Fixture {
        pub async fn new() -> Self {
            let db = Arc::new(connect_in_memory().await);
            let dir = TempDir::new().unwrap();
            let sessions = SqliteSessionStore::new(db.clone());
            let queue = SqliteJobQueue::new(db.clone(), 3);
            let metadata = Arc::new(SqliteMetadataStore::new(db));
            let service = HierarchyService::new(
                Arc::new(sessions.clone()),
                metadata.clone(),
                Arc::new(queue.clone()),
                BlobStore::new(dir.path()),
            );
            Self {
                service,
                sessions,
                queue,
                metadata,
                dir,
            }
        }

        pub async fn login(&self, user_id: &str) -> String {
            self.sessions
                .issue(user_id, Duration::from_secs(3600))
                .await
                .unwrap()
        }
    }

    pub(crate) fn file_req(name: &str, kind: &str, data: &[u8]) -> CreateFile {
        CreateFile {
            name: Some(name.into()),
            file_type: Some(kind.into()),
            data: Some(general_purpose::STANDARD.encode(data)),
            ..CreateFile::default()
        }
    }

    pub(crate) fn folder_req(name: &str) -> CreateFile {
        CreateFile {
            name: Some(name.into()),
            file_type: Some("folder".into()),
            ..CreateFile::default()
        }
    }

    async fn read_all(mut download: Download) -> Vec<u8> {
        let mut buf = Vec::new();
        download.file.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn folders_have_no_blob_and_files_do() {
        let fx = Fixture::new().await;
        let token = fx.login("u1").await;

        let folder = fx.service.create(Some(&token), folder_req("docs")).await.unwrap();
        assert_eq!(folder.file_type, FileType::Folder);
        assert!(folder.local_path.is_none());
        assert_eq!(folder.parent_id, ParentId::Root);
        assert!(!folder.is_public);

        let mut req = file_req("notes.txt", "file", b"hello");
        req.parent_id = Some(json!(folder.id.to_string()));
        let file = fx.service.create(Some(&token), req).await.unwrap();
        let path = file.local_path.clone().unwrap();
        assert!(Path::new(&path).starts_with(fx.dir.path()));
        assert!(!path.contains("notes.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert_eq!(file.parent_id, ParentId::Folder(folder.id));
        assert_eq!(file.user_id, "u1");
    }

    #[tokio::test]
    async fn create_requires_a_session() {
        let fx = Fixture::new().await;
        for token in [None, Some(""), Some("nope")] {
            let err = fx.service.create(token, folder_req("docs")).await.unwrap_err();
            assert!(matches!(err, HierarchyError::Unauthorized));
        }
    }

    #[tokio::test]
    async fn create_reports_each_missing_field() {
        let fx = Fixture::new().await;
        let token = fx.login("u1").await;

        let mut no_name = folder_req("x");
        no_name.name = None;
        let mut no_type = folder_req("x");
        no_type.file_type = None;
        let mut bad_type = folder_req("x");
        bad_type.file_type = Some("video".into());
        let mut no_data = file_req("a.txt", "file", b"");
        no_data.data = None;
        let mut bad_data = file_req("a.txt", "file", b"");
        bad_data.data = Some("!!not base64!!".into());

        let cases = [
            (no_name, "Missing name"),
            (no_type, "Missing type"),
            (bad_type, "Invalid type"),
            (no_data, "Missing data"),
            (bad_data, "Invalid data"),
        ];
        for (req, expected) in cases {
            let err = fx.service.create(Some(&token), req).await.unwrap_err();
            assert_eq!(err.to_string(), expected);
        }
        assert_eq!(fx.metadata.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn parent_must_be_an_existing_folder() {
        let fx = Fixture::new().await;
        let token = fx.login("u1").await;
        let file = fx
            .service
            .create(Some(&token), file_req("a.txt", "file", b"a"))
            .await
            .unwrap();

        let mut under_file = folder_req("child");
        under_file.parent_id = Some(json!(file.id.to_string()));
        let err = fx.service.create(Some(&token), under_file).await.unwrap_err();
        assert!(matches!(err, HierarchyError::ParentNotFolder));

        for parent in [json!(Uuid::new_v4().to_string()), json!("garbage"), json!(12)] {
            let mut req = folder_req("child");
            req.parent_id = Some(parent);
            let err = fx.service.create(Some(&token), req).await.unwrap_err();
            assert!(matches!(err, HierarchyError::ParentNotFound));
        }
    }

    #[tokio::test]
    async fn foreign_folder_is_not_a_valid_parent() {
        let fx = Fixture::new().await;
        let owner = fx.login("u1").await;
        let other = fx.login("u2").await;
        let folder = fx.service.create(Some(&owner), folder_req("docs")).await.unwrap();

        let mut req = folder_req("intruder");
        req.parent_id = Some(json!(folder.id.to_string()));
        let err = fx.service.create(Some(&other), req).await.unwrap_err();
        assert!(matches!(err, HierarchyError::ParentNotFound));
    }

    #[tokio::test]
    async fn only_images_are_queued_for_thumbnails() {
        let fx = Fixture::new().await;
        let token = fx.login("u1").await;

        fx.service.create(Some(&token), folder_req("docs")).await.unwrap();
        fx.service
            .create(Some(&token), file_req("a.txt", "file", b"a"))
            .await
            .unwrap();
        let image = fx
            .service
            .create(Some(&token), file_req("p.png", "image", b"not really a png"))
            .await
            .unwrap();

        let job = fx.queue.claim_next().await.unwrap().unwrap();
        let payload: ThumbnailJob = serde_json::from_str(&job.payload).unwrap();
        assert_eq!(payload, ThumbnailJob::new(image.id, "u1"));
        assert!(fx.queue.claim_next().await.unwrap().is_none());
    }

    struct BrokenQueue;

    #[async_trait]
    impl JobQueue for BrokenQueue {
        async fn enqueue(&self, _job: &ThumbnailJob) -> StoreResult<Uuid> {
            Err(StoreError::Corrupt("queue offline".into()))
        }

        async fn stats(&self) -> StoreResult<QueueStats> {
            Err(StoreError::Corrupt("queue offline".into()))
        }
    }

    #[tokio::test]
    async fn enqueue_failure_does_not_fail_upload() {
        let mut fx = Fixture::new().await;
        let jobs: Arc<dyn JobQueue> = Arc::new(BrokenQueue);
        fx.service.jobs = jobs;
        let token = fx.login("u1").await;

        let image = fx
            .service
            .create(Some(&token), file_req("p.png", "image", b"bytes"))
            .await
            .unwrap();
        assert!(image.local_path.is_some());
        assert_eq!(fx.service.get_one(Some(&token), &image.id.to_string()).await.unwrap(), image);
    }

    #[tokio::test]
    async fn get_one_hides_foreign_records() {
        let fx = Fixture::new().await;
        let owner = fx.login("u1").await;
        let other = fx.login("u2").await;
        let folder = fx.service.create(Some(&owner), folder_req("docs")).await.unwrap();

        let id = folder.id.to_string();
        assert_eq!(fx.service.get_one(Some(&owner), &id).await.unwrap(), folder);
        assert!(matches!(
            fx.service.get_one(Some(&other), &id).await.unwrap_err(),
            HierarchyError::NotFound
        ));
        assert!(matches!(
            fx.service.get_one(Some(&owner), "nope").await.unwrap_err(),
            HierarchyError::NotFound
        ));
    }

    #[tokio::test]
    async fn pages_partition_the_full_listing() {
        let fx = Fixture::new().await;
        let token = fx.login("u1").await;
        let folder = fx.service.create(Some(&token), folder_req("docs")).await.unwrap();
        let parent = folder.id.to_string();

        for i in 0..45 {
            let mut req = folder_req(&format!("item-{i:02}"));
            req.parent_id = Some(json!(parent));
            fx.service.create(Some(&token), req).await.unwrap();
        }

        let all = fx
            .metadata
            .find(&FileFilter::children("u1", ParentId::Folder(folder.id)), 0, 1000)
            .await
            .unwrap();
        assert_eq!(all.len(), 45);

        let page0 = fx.service.list(Some(&token), Some(&parent), None).await.unwrap();
        let page1 = fx.service.list(Some(&token), Some(&parent), Some("1")).await.unwrap();
        let page2 = fx.service.list(Some(&token), Some(&parent), Some("2")).await.unwrap();
        let page3 = fx.service.list(Some(&token), Some(&parent), Some("3")).await.unwrap();

        assert_eq!(page0.len(), 20);
        assert_eq!(page1.len(), 20);
        assert_eq!(page2.len(), 5);
        assert!(page3.is_empty());
        assert_eq!(page1[0].name, "item-20");
        assert_eq!(page1[19].name, "item-39");

        let concatenated: Vec<FileRecord> = page0.into_iter().chain(page1).collect();
        assert_eq!(concatenated, all[..40].to_vec());
    }

    #[tokio::test]
    async fn list_defaults_to_root_and_tolerates_unknown_parents() {
        let fx = Fixture::new().await;
        let token = fx.login("u1").await;
        fx.service.create(Some(&token), folder_req("docs")).await.unwrap();

        assert_eq!(fx.service.list(Some(&token), None, None).await.unwrap().len(), 1);
        assert!(fx
            .service
            .list(Some(&token), Some("not-an-id"), None)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            fx.service.list(Some(&token), None, Some("two")).await.unwrap_err(),
            HierarchyError::InvalidField("page")
        ));
        for far in ["500000000000000000", "18446744073709551615"] {
            assert!(fx
                .service
                .list(Some(&token), None, Some(far))
                .await
                .unwrap()
                .is_empty());
        }
        assert!(matches!(
            fx.service.list(None, None, None).await.unwrap_err(),
            HierarchyError::Unauthorized
        ));
    }

    #[tokio::test]
    async fn publish_unpublish_round_trip() {
        let fx = Fixture::new().await;
        let owner = fx.login("u1").await;
        let other = fx.login("u2").await;
        let file = fx
            .service
            .create(Some(&owner), file_req("a.txt", "file", b"a"))
            .await
            .unwrap();
        let id = file.id.to_string();

        let published = fx.service.publish(Some(&owner), &id).await.unwrap();
        assert!(published.is_public);
        let unpublished = fx.service.unpublish(Some(&owner), &id).await.unwrap();
        assert!(!unpublished.is_public);
        assert_eq!(unpublished, file);

        assert!(matches!(
            fx.service.publish(Some(&other), &id).await.unwrap_err(),
            HierarchyError::NotFound
        ));
        assert!(!fx.service.get_one(Some(&owner), &id).await.unwrap().is_public);
    }

    #[tokio::test]
    async fn private_files_are_only_readable_by_their_owner() {
        let fx = Fixture::new().await;
        let u1 = fx.login("u1").await;
        let u2 = fx.login("u2").await;
        let f1 = fx
            .service
            .create(Some(&u1), file_req("f1.txt", "file", b"secret"))
            .await
            .unwrap();
        let id = f1.id.to_string();

        for token in [Some(u2.as_str()), None, Some("bogus")] {
            let err = fx.service.download(token, &id, None).await.unwrap_err();
            assert!(matches!(err, HierarchyError::NotFound));
        }

        let download = fx.service.download(Some(&u1), &id, None).await.unwrap();
        assert_eq!(download.content_type, "text/plain");
        assert_eq!(download.len, 6);
        assert_eq!(read_all(download).await, b"secret");

        fx.service.publish(Some(&u1), &id).await.unwrap();
        let public = fx.service.download(None, &id, None).await.unwrap();
        assert_eq!(read_all(public).await, b"secret");
    }

    #[tokio::test]
    async fn download_rejects_folders_missing_blobs_and_bad_sizes() {
        let fx = Fixture::new().await;
        let token = fx.login("u1").await;
        let folder = fx.service.create(Some(&token), folder_req("docs")).await.unwrap();
        let file = fx
            .service
            .create(Some(&token), file_req("a.bin", "file", b"a"))
            .await
            .unwrap();
        let id = file.id.to_string();

        let err = fx
            .service
            .download(Some(&token), &folder.id.to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::NotFound));

        let err = fx.service.download(Some(&token), &id, Some("500")).await.unwrap_err();
        assert!(matches!(err, HierarchyError::NotFound));
        let err = fx.service.download(Some(&token), &id, Some("42")).await.unwrap_err();
        assert!(matches!(err, HierarchyError::InvalidField("size")));

        let download = fx.service.download(Some(&token), &id, None).await.unwrap();
        assert_eq!(download.content_type, "application/octet-stream");
        drop(download);

        std::fs::remove_file(file.local_path.unwrap()).unwrap();
        let err = fx.service.download(Some(&token), &id, None).await.unwrap_err();
        assert!(matches!(err, HierarchyError::NotFound));
    }

    #[tokio::test]
    async fn derived_thumbnails_follow_the_visibility_rule() {
        let fx = Fixture::new().await;
        let owner = fx.login("u1").await;
        let other = fx.login("u2").await;
        let image = fx
            .service
            .create(Some(&owner), file_req("p.png", "image", &png_bytes(600, 400)))
            .await
            .unwrap();
        let id = image.id.to_string();

        ThumbnailWorker::new(fx.metadata.clone(), Arc::new(ImageThumbnailer))
            .process(&ThumbnailJob::new(image.id, "u1"))
            .await
            .unwrap();

        let download = fx.service.download(Some(&owner), &id, Some("250")).await.unwrap();
        assert_eq!(download.content_type, "image/png");
        let thumbnail = image::load_from_memory(&read_all(download).await).unwrap();
        assert_eq!(thumbnail.width(), 250);

        for token in [Some(other.as_str()), None] {
            let err = fx.service.download(token, &id, Some("250")).await.unwrap_err();
            assert!(matches!(err, HierarchyError::NotFound));
        }

        fx.service.publish(Some(&owner), &id).await.unwrap();
        let public = fx.service.download(None, &id, Some("100")).await.unwrap();
        let thumbnail = image::load_from_memory(&read_all(public).await).unwrap();
        assert_eq!(thumbnail.width(), 100);
    }

    struct RejectingInserts(Arc<SqliteMetadataStore>);

    #[async_trait]
    impl MetadataStore for RejectingInserts {
        async fn insert(&self, _record: NewFileRecord) -> StoreResult<FileRecord> {
            Err(StoreError::Corrupt("disk full".into()))
        }

        async fn find_one(&self, filter: &FileFilter) -> StoreResult<Option<FileRecord>> {
            self.0.find_one(filter).await
        }

        async fn find(
            &self,
            filter: &FileFilter,
            skip: u64,
            limit: u64,
        ) -> StoreResult<Vec<FileRecord>> {
            self.0.find(filter, skip, limit).await
        }

        async fn update_one(
            &self,
            filter: &FileFilter,
            update: FileUpdate,
        ) -> StoreResult<Option<FileRecord>> {
            self.0.update_one(filter, update).await
        }

        async fn count(&self) -> StoreResult<i64> {
            self.0.count().await
        }

        async fn health_check(&self) -> StoreResult<bool> {
            self.0.health_check().await
        }
    }

    #[tokio::test]
    async fn failed_insert_removes_the_written_blob() {
        let mut fx = Fixture::new().await;
        let metadata: Arc<dyn MetadataStore> = Arc::new(RejectingInserts(fx.metadata.clone()));
        fx.service.metadata = metadata;
        let token = fx.login("u1").await;

        let err = fx
            .service
            .create(Some(&token), file_req("a.txt", "file", b"content"))
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::Store(_)));
        assert_eq!(std::fs::read_dir(fx.dir.path()).unwrap().count(), 0);
        assert_eq!(fx.queue.stats().await.unwrap(), QueueStats::default());
    }
}
