//! Content delivery server: chunked large-file uploads assembled on disk,
//! JSON-file entity collections, and a websocket chat relay between site
//! visitors and a single admin.

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use config::AppConfig;
pub use errors::AppError;
pub use routes::routes::routes;
pub use state::AppState;
