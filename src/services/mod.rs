//! Core services: chunk assembly, entity records, chat relay and their
//! JSON-file backing.

pub mod chat_relay;
pub mod ids;
pub mod json_store;
pub mod record_service;
pub mod upload_service;
