//! HTTP handlers for file and folder operations.
//! Translate requests into `HierarchyService` calls; downloads are streamed
//! from disk without buffering.

use crate::{
    errors::AppError,
    models::file::FileRecord,
    services::hierarchy_service::{CreateFile, HierarchyService},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::io::ReaderStream;

/// Header carrying the session token.
pub const TOKEN_HEADER: &str = "x-token";

/// Body of `POST /files`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileReq {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub parent_id: Option<Value>,
    pub is_public: Option<bool>,
    /// Base64-encoded content.
    pub data: Option<String>,
}

/// Query params of `GET /files`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesQuery {
    pub parent_id: Option<String>,
    pub page: Option<String>,
}

/// Query params of `GET /files/{id}/data`.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// Thumbnail width; the original is served when absent.
    pub size: Option<String>,
}

fn token(headers: &HeaderMap) -> Option<&str> {
    headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok())
}

/// `POST /files` - create a folder or upload a file.
pub async fn create_file(
    State(service): State<HierarchyService>,
    headers: HeaderMap,
    Json(body): Json<CreateFileReq>,
) -> Result<(StatusCode, Json<FileRecord>), AppError> {
    let req = CreateFile {
        name: body.name,
        file_type: body.file_type,
        parent_id: body.parent_id,
        is_public: body.is_public,
        data: body.data,
    };
    let record = service.create(token(&headers), req).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /files/{id}`
pub async fn get_file(
    State(service): State<HierarchyService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(service.get_one(token(&headers), &id).await?))
}

/// `GET /files?parentId=&page=` - twenty records per page.
pub async fn list_files(
    State(service): State<HierarchyService>,
    headers: HeaderMap,
    Query(q): Query<ListFilesQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let records = service
        .list(token(&headers), q.parent_id.as_deref(), q.page.as_deref())
        .await?;
    Ok(Json(records))
}

/// `PUT /files/{id}/publish`
pub async fn publish_file(
    State(service): State<HierarchyService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = service.publish(token(&headers), &id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PUT /files/{id}/unpublish`
pub async fn unpublish_file(
    State(service): State<HierarchyService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = service.unpublish(token(&headers), &id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /files/{id}/data?size=` - stream the content or one of its thumbnails.
pub async fn download_file(
    State(service): State<HierarchyService>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let download = service
        .download(token(&headers), &id, q.size.as_deref())
        .await?;

    let body = Body::from_stream(ReaderStream::new(download.file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&download.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    resp_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.len));

    Ok(response)
}
