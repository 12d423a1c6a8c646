//! Contracts for the collaborators the file service depends on, and their
//! SQLite-backed implementations.
//!
//! Handlers and the worker only see the traits, so every store can be
//! swapped for another backend (or a test double) at startup.

pub mod job_queue;
pub mod metadata_store;
pub mod session_store;

use crate::models::{
    file::{FileRecord, NewFileRecord, ParentId},
    job::{QueueStats, ThumbnailJob},
};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use job_queue::SqliteJobQueue;
pub use metadata_store::SqliteMetadataStore;
pub use session_store::SqliteSessionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Token lookup. Keys have the form `auth_{token}`; an expired key and an
/// unknown key both read as `None`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
}

/// Conjunction of exact-match conditions. `None` fields are unconstrained.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileFilter {
    pub id: Option<Uuid>,
    pub user_id: Option<String>,
    pub parent_id: Option<ParentId>,
}

impl FileFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn owned(id: Uuid, user_id: &str) -> Self {
        Self {
            id: Some(id),
            user_id: Some(user_id.to_string()),
            parent_id: None,
        }
    }

    pub fn children(user_id: &str, parent_id: ParentId) -> Self {
        Self {
            id: None,
            user_id: Some(user_id.to_string()),
            parent_id: Some(parent_id),
        }
    }
}

/// Fields that may change after creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileUpdate {
    pub is_public: bool,
}

/// Flat document collection of file and folder records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a record and return it with its assigned id.
    async fn insert(&self, record: NewFileRecord) -> StoreResult<FileRecord>;

    async fn find_one(&self, filter: &FileFilter) -> StoreResult<Option<FileRecord>>;

    /// Matching records in insertion order.
    async fn find(&self, filter: &FileFilter, skip: u64, limit: u64)
    -> StoreResult<Vec<FileRecord>>;

    /// Apply `update` to the first matching record and return it as updated.
    async fn update_one(
        &self,
        filter: &FileFilter,
        update: FileUpdate,
    ) -> StoreResult<Option<FileRecord>>;

    async fn count(&self) -> StoreResult<i64>;

    async fn health_check(&self) -> StoreResult<bool>;
}

/// Producer side of the thumbnail queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &ThumbnailJob) -> StoreResult<Uuid>;

    /// Job counts per status.
    async fn stats(&self) -> StoreResult<QueueStats>;
}
