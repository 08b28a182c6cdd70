//! Application state shared across handlers.

use crate::{
    config::AppConfig,
    services::{
        chat_relay::ChatRelay, ids::IdGenerator, json_store::JsonStore,
        record_service::RecordService, upload_service::UploadService,
    },
};
use anyhow::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub records: RecordService,
    pub chat: ChatRelay,
    pub store: JsonStore,
    /// Bearer token guarding `/api/*`; `None` allows every request.
    pub admin_token: Option<Arc<str>>,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Open the stores and services described by `cfg`, creating missing
    /// directories.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let store = JsonStore::open(&cfg.data_dir).await?;
        let ids = IdGenerator::new();
        let uploads = UploadService::new(
            cfg.temp_dir(),
            cfg.downloads_dir(),
            store.clone(),
            ids.clone(),
        )
        .await?;
        let records = RecordService::new(store.clone(), ids, cfg.downloads_dir());
        let chat = ChatRelay::load(store.clone()).await?;

        Ok(Self {
            uploads,
            records,
            chat,
            store,
            admin_token: cfg.admin_token.as_deref().map(Arc::from),
            max_body_bytes: cfg.max_body_bytes,
        })
    }
}
