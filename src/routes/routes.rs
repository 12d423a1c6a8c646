//! Defines routes for the file storage API.
//!
//! ## Structure
//! - **Service endpoints**
//!   - `GET  /healthz`, `GET /readyz` - liveness and readiness probes
//!   - `GET  /status` - metadata store reachability
//!   - `GET  /stats`  - record count
//!
//! - **File endpoints** (session token in `X-Token`)
//!   - `POST /files`                 - create folder or upload file
//!   - `GET  /files?parentId=&page=` - list children, twenty per page
//!   - `GET  /files/{id}`            - show one record
//!   - `PUT  /files/{id}/publish`    - make public
//!   - `PUT  /files/{id}/unpublish`  - make private
//!   - `GET  /files/{id}/data?size=` - download content or a thumbnail

use crate::{
    handlers::{
        file_handlers::{
            create_file, download_file, get_file, list_files, publish_file, unpublish_file,
        },
        health_handlers::{healthz, readyz, stats, status},
    },
    services::hierarchy_service::HierarchyService,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build the router. Handlers share a `HierarchyService` as state.
pub fn routes() -> Router<HierarchyService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .route("/stats", get(stats))
        .route("/files", get(list_files).post(create_file))
        .route("/files/{id}", get(get_file))
        .route("/files/{id}/publish", put(publish_file))
        .route("/files/{id}/unpublish", put(unpublish_file))
        .route("/files/{id}/data", get(download_file))
}
