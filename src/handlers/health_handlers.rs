//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the JSON tables and disk I/O

use crate::{models::entity::EntityRecord, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe: always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
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
/// 1. Loads the `software` table to prove the data directory is readable.
/// 2. Performs a best-effort write/read/delete in the chunk, download and
///    data directories.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = HashMap::new();

    let store_check = match state.store.load::<Vec<EntityRecord>>("software").await {
        Ok(_) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };
    checks.insert("store", store_check);
    checks.insert("chunks", disk_check(state.uploads.temp_dir()).await);
    checks.insert("downloads", disk_check(state.uploads.downloads_dir()).await);
    checks.insert("data", disk_check(state.store.root()).await);

    let overall_ok = checks.values().all(|c| c.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn disk_check(dir: &Path) -> CheckStatus {
    let tmp_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => CheckStatus::ok(),
                Err(e) => CheckStatus {
                    ok: true,
                    error: Some(format!("could not remove tmp file: {}", e)),
                },
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                CheckStatus::failed("file content mismatch".to_string())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                CheckStatus::failed(format!("could not read tmp file: {}", e))
            }
        },
        Err(e) => CheckStatus::failed(format!("could not write tmp file: {}", e)),
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

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
