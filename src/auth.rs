//! Allow/deny gate for admin routes.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

/// Middleware: require `Authorization: Bearer <token>` when a token is
/// configured. Without one every request passes.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.admin_token.as_deref() {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected) {
            return Err(AppError::unauthorized("Unauthorized"));
        }
    }
    Ok(next.run(request).await)
}
