//! Entity record endpoints, the public request form, and serving stored
//! artifacts.

use crate::{
    errors::AppError,
    models::entity::{ContactRequest, EntityKind, EntityRecord},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio_util::io::ReaderStream;

fn parse_entity(raw: &str) -> Result<EntityKind, AppError> {
    raw.parse::<EntityKind>()
        .map_err(|name| AppError::bad_request(format!("unknown entity `{}`", name)))
}

/// `GET /api/{entity}`
pub async fn list_records(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<Vec<EntityRecord>>, AppError> {
    let entity = parse_entity(&entity)?;
    Ok(Json(state.records.list(entity).await?))
}

/// `POST /api/{entity}`: a catalog record without an uploaded file.
pub async fn create_record(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(fields): Json<EntityRecord>,
) -> Result<impl IntoResponse, AppError> {
    let entity = parse_entity(&entity)?;
    let record = state.records.create(entity, fields).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PUT /api/{entity}/{id}`
pub async fn update_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Json(changes): Json<EntityRecord>,
) -> Result<Json<EntityRecord>, AppError> {
    let entity = parse_entity(&entity)?;
    Ok(Json(state.records.update(entity, &id, changes).await?))
}

/// `GET /public/{entity}`: catalog collections only.
pub async fn list_public_records(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<Vec<EntityRecord>>, AppError> {
    let entity = parse_entity(&entity)?;
    if !entity.is_public() {
        return Err(AppError::not_found(format!("unknown collection `{}`", entity)));
    }
    Ok(Json(state.records.list(entity).await?))
}

/// `POST /public/request`: contact form intake.
pub async fn submit_request(
    State(state): State<AppState>,
    Json(req): Json<ContactRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.records.submit_request(req).await?;
    Ok(Json(json!({ "success": true, "message": "Request received" })))
}

/// `DELETE /api/{entity}/{id}`: removes the record and the file it owns.
pub async fn delete_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = parse_entity(&entity)?;
    state.records.delete(entity, &id).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Deleted successfully" })),
    ))
}

/// `GET /downloads/{file_name}` as a streaming response.
pub async fn download(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let (file, len) = state.uploads.open_download(&file_name).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    let content_type = mime_guess::from_path(&file_name).first_or_octet_stream();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}
