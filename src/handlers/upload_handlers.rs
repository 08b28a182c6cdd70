//! HTTP handlers for chunk upload, assembly and single-shot uploads.
//! Multipart file fields are streamed to disk; nothing is buffered whole.

use crate::{
    errors::AppError,
    models::{entity::EntityRecord, upload::AssembleRequest},
    services::upload_service::StagedChunk,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use futures::{Stream, TryStreamExt};
use serde_json::{Value, json};
use std::io;

fn field_stream<'a>(field: Field<'a>) -> impl Stream<Item = io::Result<Bytes>> + 'a {
    field.map_err(io::Error::other)
}

/// `POST /api/upload-chunk`
///
/// Multipart fields: `chunk` (file), `chunkNumber`, `originalFilename`.
/// Browsers send the file part first, so it is staged before the fields
/// that name it are known.
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let uploads = &state.uploads;
    let mut staged: Option<StagedChunk> = None;
    let mut chunk_number: Option<String> = None;
    let mut original_filename: Option<String> = None;

    let result = async {
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("chunk") => {
                    let next = uploads.stage_chunk(field_stream(field)).await?;
                    if let Some(previous) = staged.replace(next) {
                        uploads.discard_staged(previous).await;
                    }
                }
                Some("chunkNumber") => chunk_number = Some(field.text().await?),
                Some("originalFilename") => original_filename = Some(field.text().await?),
                _ => {}
            }
        }
        Ok::<(), AppError>(())
    }
    .await;

    let Some(staged) = staged else {
        result?;
        return Err(AppError::bad_request("Chunk file is missing."));
    };
    if let Err(err) = result {
        uploads.discard_staged(staged).await;
        return Err(err);
    }

    let parsed = chunk_number
        .as_deref()
        .map(str::trim)
        .and_then(|n| n.parse::<u32>().ok());
    let (Some(chunk_number), Some(original_filename)) = (parsed, original_filename) else {
        uploads.discard_staged(staged).await;
        return Err(AppError::bad_request(
            "chunkNumber and originalFilename are required",
        ));
    };

    let receipt = uploads
        .commit_chunk(staged, chunk_number, &original_filename)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Chunk uploaded",
        "chunkNumber": receipt.chunk_number,
        "sizeBytes": receipt.size_bytes,
    }))
    .into_response())
}

/// `POST /api/assemble-chunks`
pub async fn assemble_chunks(
    State(state): State<AppState>,
    Json(req): Json<AssembleRequest>,
) -> Result<Response, AppError> {
    let artifact = state.uploads.assemble(&req).await?;

    let mut response = Json(json!({
        "success": true,
        "message": "File assembled successfully",
    }))
    .into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", artifact.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `POST /api/upload-thumbnail`: multipart field `thumbnail`.
pub async fn upload_thumbnail(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("thumbnail") {
            continue;
        }
        let original_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("thumbnail needs a file name"))?;
        let stored = state
            .uploads
            .store_file(&original_name, field_stream(field))
            .await?;
        return Ok(Json(json!({ "success": true, "fileName": stored.file_name })));
    }
    Err(AppError::bad_request("No file uploaded."))
}

/// `POST /public/submissions`
///
/// Multipart fields: `submissionFile` (file), `examId`, `name`, `phone`,
/// `email`. Text fields must precede the file part to be recorded.
pub async fn submit_exam(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut exam_id = Value::Null;
    let mut student = EntityRecord::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("examId") => exam_id = Value::from(field.text().await?),
            Some(key @ ("name" | "phone" | "email")) => {
                student.insert(key.to_string(), Value::from(field.text().await?));
            }
            Some("submissionFile") => {
                let original_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("submission needs a file name"))?;

                let mut record = EntityRecord::new();
                record.insert("examId".into(), exam_id.clone());
                record.insert("studentInfo".into(), Value::Object(student.clone()));
                record.insert(
                    "submissionDate".into(),
                    Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
                state
                    .uploads
                    .submit(&original_name, record, field_stream(field))
                    .await?;
                return Ok((
                    StatusCode::CREATED,
                    Json(json!({ "success": true, "message": "Submission received" })),
                ));
            }
            _ => {}
        }
    }
    Err(AppError::bad_request("submissionFile is required"))
}
