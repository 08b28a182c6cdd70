//! Defines routes for uploads, entity collections, downloads and chat.
//!
//! ## Structure
//! - **Admin endpoints** (behind the bearer-token gate)
//!   - `POST   /api/upload-chunk`: store one chunk
//!   - `POST   /api/assemble-chunks`: concatenate chunks, register metadata
//!   - `POST   /api/upload-thumbnail`: single-shot image upload
//!   - `GET    /api/{entity}`: list a collection
//!   - `POST   /api/{entity}`: add a catalog record without a file
//!   - `PUT    /api/{entity}/{id}`: edit a record (requests: status only)
//!   - `DELETE /api/{entity}/{id}`: delete a record and its file
//!
//! - **Public endpoints**
//!   - `GET    /public/{entity}`: catalog listing (software, courses, exams)
//!   - `POST   /public/submissions`: exam submission upload
//!   - `POST   /public/request`: contact form
//!   - `GET    /downloads/{file_name}`: stream a stored file
//!   - `GET    /socket`: chat websocket

use crate::{
    auth::require_admin,
    handlers::{
        chat_handlers::chat_socket,
        entity_handlers::{
            create_record, delete_record, download, list_public_records, list_records,
            submit_request, update_record,
        },
        health_handlers::{healthz, readyz},
        upload_handlers::{assemble_chunks, submit_exam, upload_chunk, upload_thumbnail},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};

/// Build the application router with its state attached.
///
/// Admin routes share one middleware layer; the body limit is raised for
/// every route so full-size chunks fit.
pub fn routes(state: AppState) -> Router {
    let admin = Router::new()
        .route("/upload-chunk", post(upload_chunk))
        .route("/assemble-chunks", post(assemble_chunks))
        .route("/upload-thumbnail", post(upload_thumbnail))
        .route("/{entity}", get(list_records).post(create_record))
        .route("/{entity}/{id}", put(update_record).delete(delete_record))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let public = Router::new()
        .route("/submissions", post(submit_exam))
        .route("/request", post(submit_request))
        .route("/{entity}", get(list_public_records));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api", admin)
        .nest("/public", public)
        .route("/downloads/{file_name}", get(download))
        .route("/socket", get(chat_socket))
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .with_state(state)
}
