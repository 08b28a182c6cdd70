//! Data models for uploads, entity records and chat.
//!
//! Everything here serializes with the camelCase field names the browser
//! clients already use.

pub mod chat;
pub mod entity;
pub mod upload;
