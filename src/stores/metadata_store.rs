//! File and folder records in SQLite.

use super::{FileFilter, FileUpdate, MetadataStore, StoreError, StoreResult};
use crate::models::file::{FileRecord, FileType, NewFileRecord, ParentId};
use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, user_id, name, type, is_public, parent_id, local_path";

/// Raw row as stored; ids and enums are kept as text.
#[derive(FromRow, Debug)]
struct FileRow {
    id: String,
    user_id: String,
    name: String,
    #[sqlx(rename = "type")]
    file_type: String,
    is_public: bool,
    parent_id: String,
    local_path: Option<String>,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = StoreError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|_| StoreError::Corrupt(format!("file id `{}`", row.id)))?;
        let file_type = row.file_type.parse::<FileType>().map_err(StoreError::Corrupt)?;
        let parent_id = ParentId::parse(&row.parent_id)
            .ok_or_else(|| StoreError::Corrupt(format!("parent id `{}`", row.parent_id)))?;

        Ok(FileRecord {
            id,
            user_id: row.user_id,
            name: row.name,
            file_type,
            is_public: row.is_public,
            parent_id,
            local_path: row.local_path,
        })
    }
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

/// Append `WHERE` conditions for every constrained field of `filter`.
fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &FileFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(id) = filter.id {
        builder.push(" AND id = ");
        builder.push_bind(id.to_string());
    }
    if let Some(user_id) = &filter.user_id {
        builder.push(" AND user_id = ");
        builder.push_bind(user_id.clone());
    }
    if let Some(parent_id) = filter.parent_id {
        builder.push(" AND parent_id = ");
        builder.push_bind(parent_id.to_string());
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: NewFileRecord) -> StoreResult<FileRecord> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "INSERT INTO files (id, user_id, name, type, is_public, parent_id, local_path)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {}",
            FILE_COLUMNS
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&record.user_id)
        .bind(&record.name)
        .bind(record.file_type.as_str())
        .bind(record.is_public)
        .bind(record.parent_id.to_string())
        .bind(&record.local_path)
        .fetch_one(&*self.db)
        .await?;

        row.try_into()
    }

    async fn find_one(&self, filter: &FileFilter) -> StoreResult<Option<FileRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM files", FILE_COLUMNS));
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY seq ASC LIMIT 1");

        let row: Option<FileRow> = builder.build_query_as().fetch_optional(&*self.db).await?;
        row.map(FileRecord::try_from).transpose()
    }

    async fn find(
        &self,
        filter: &FileFilter,
        skip: u64,
        limit: u64,
    ) -> StoreResult<Vec<FileRecord>> {
        // SQLite reads a negative OFFSET as zero; past i64::MAX nothing can match.
        let Ok(skip) = i64::try_from(skip) else {
            return Ok(Vec::new());
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM files", FILE_COLUMNS));
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY seq ASC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(skip);

        let rows: Vec<FileRow> = builder.build_query_as().fetch_all(&*self.db).await?;
        rows.into_iter().map(FileRecord::try_from).collect()
    }

    async fn update_one(
        &self,
        filter: &FileFilter,
        update: FileUpdate,
    ) -> StoreResult<Option<FileRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE files SET is_public = ");
        builder.push_bind(update.is_public);
        builder.push(" WHERE seq = (SELECT seq FROM files");
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY seq ASC LIMIT 1) RETURNING ");
        builder.push(FILE_COLUMNS);

        let row: Option<FileRow> = builder.build_query_as().fetch_optional(&*self.db).await?;
        row.map(FileRecord::try_from).transpose()
    }

    async fn count(&self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(value == 1)
    }
}
