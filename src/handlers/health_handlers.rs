//! Health, readiness and statistics handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and disk I/O
//! - GET /status   -> `{"db": bool}`
//! - GET /stats    -> `{"files": count, "thumbnails": {pending, running, completed, failed}}`

use crate::{
    errors::AppError, models::job::QueueStats, services::hierarchy_service::HierarchyService,
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against the metadata store.
/// 2. Performs a write/read/delete against the storage root.
///
/// HTTP 200 when all checks pass, HTTP 503 otherwise.
pub async fn readyz(State(service): State<HierarchyService>) -> impl IntoResponse {
    let db_check = match service.metadata.health_check().await {
        Ok(true) => (true, None::<String>),
        Ok(false) => (false, Some("unexpected result".to_string())),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let disk_check = probe_disk(&service).await;

    let overall_ok = db_check.0 && disk_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "db",
        CheckStatus {
            ok: db_check.0,
            error: db_check.1,
        },
    );
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_check.0,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// `GET /status`
pub async fn status(State(service): State<HierarchyService>) -> Json<StatusResponse> {
    let db = service.metadata.health_check().await.unwrap_or(false);
    Json(StatusResponse { db })
}

/// `GET /stats`
pub async fn stats(
    State(service): State<HierarchyService>,
) -> Result<Json<StatsResponse>, AppError> {
    let files = service.metadata.count().await.map_err(AppError::internal)?;
    let thumbnails = service.jobs.stats().await.map_err(AppError::internal)?;
    Ok(Json(StatsResponse { files, thumbnails }))
}

async fn probe_disk(service: &HierarchyService) -> (bool, Option<String>) {
    let base_path = &service.blobs.base_path;
    if let Err(e) = fs::create_dir_all(base_path).await {
        return (false, Some(format!("could not create storage root: {}", e)));
    }

    let tmp_path = base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => (true, None),
                Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some("file content mismatch".to_string()))
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some(format!("could not read tmp file: {}", e)))
            }
        },
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct StatusResponse {
    pub db: bool,
}

#[derive(Serialize, Debug)]
pub struct StatsResponse {
    pub files: i64,
    pub thumbnails: QueueStats,
}

#[cfg(test)]
mod tests {
    use crate::{
        routes::routes::routes,
        services::{
            hierarchy_service::tests::{Fixture, file_req, folder_req},
            thumbnail_worker::tests::png_bytes,
        },
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn get_json(fx: &Fixture, uri: &str) -> (StatusCode, Value) {
        let response = routes()
            .with_state(fx.service.clone())
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn probes_report_ok() {
        let fx = Fixture::new().await;

        let (status, body) = get_json(&fx, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["disk"]["ok"], json!(true));
        assert_eq!(std::fs::read_dir(fx.dir.path()).unwrap().count(), 0);

        assert_eq!(get_json(&fx, "/status").await.1, json!({"db": true}));
    }

    #[tokio::test]
    async fn stats_count_records() {
        let fx = Fixture::new().await;
        let token = fx.login("u1").await;
        fx.service.create(Some(&token), folder_req("a")).await.unwrap();
        fx.service
            .create(Some(&token), file_req("p.png", "image", &png_bytes(10, 10)))
            .await
            .unwrap();

        assert_eq!(
            get_json(&fx, "/stats").await.1,
            json!({
                "files": 2,
                "thumbnails": {"pending": 1, "running": 0, "completed": 0, "failed": 0}
            })
        );
    }
}
