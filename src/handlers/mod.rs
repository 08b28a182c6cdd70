pub mod chat_handlers;
pub mod entity_handlers;
pub mod health_handlers;
pub mod upload_handlers;
