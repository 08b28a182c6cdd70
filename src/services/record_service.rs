//! src/services/record_service.rs
//!
//! RecordService: admin edits of entity collections and the public request
//! intake. Every change is one read-modify-write under the table's lock.

use crate::{
    models::entity::{ContactRequest, EntityKind, EntityRecord, record_has_id},
    services::{
        ids::IdGenerator,
        json_store::{JsonStore, StoreError},
        upload_service::ensure_filename_safe,
    },
};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::{io::ErrorKind, path::PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Fields a client may not set: `id` is assigned here and `fileName`
/// names the artifact a record owns.
const PROTECTED_FIELDS: [&str; 2] = ["id", "fileName"];

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record `{id}` not found in {entity}")]
    NotFound { entity: EntityKind, id: String },
    #[error("{entity} records cannot be {action} directly")]
    ReadOnly {
        entity: EntityKind,
        action: &'static str,
    },
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RecordResult<T> = Result<T, RecordError>;

#[derive(Clone)]
pub struct RecordService {
    store: JsonStore,
    ids: IdGenerator,
    downloads_dir: PathBuf,
}

impl RecordService {
    pub fn new(store: JsonStore, ids: IdGenerator, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            ids,
            downloads_dir: downloads_dir.into(),
        }
    }

    pub async fn list(&self, entity: EntityKind) -> RecordResult<Vec<EntityRecord>> {
        Ok(self.store.load(entity.table()).await?)
    }

    /// Add a catalog record that has no uploaded file, newest first.
    pub async fn create(
        &self,
        entity: EntityKind,
        mut fields: EntityRecord,
    ) -> RecordResult<EntityRecord> {
        if !entity.is_public() {
            return Err(RecordError::ReadOnly {
                entity,
                action: "created",
            });
        }
        for key in PROTECTED_FIELDS {
            fields.remove(key);
        }
        fields.insert("id".into(), Value::from(self.ids.next_id()));

        let record = fields.clone();
        self.store
            .update(entity.table(), |records: &mut Vec<EntityRecord>| {
                records.insert(0, record)
            })
            .await?;
        info!("created record {} in {}", fields["id"], entity);
        Ok(fields)
    }

    /// Merge `changes` into a record and return the result.
    ///
    /// Catalog records take any field except `id` and `fileName`. Requests
    /// only take a new `status`. Submissions cannot be edited.
    pub async fn update(
        &self,
        entity: EntityKind,
        id: &str,
        mut changes: EntityRecord,
    ) -> RecordResult<EntityRecord> {
        let changes = match entity {
            EntityKind::Submissions => {
                return Err(RecordError::ReadOnly {
                    entity,
                    action: "edited",
                });
            }
            EntityKind::Requests => status_change(changes)?,
            _ => {
                for key in PROTECTED_FIELDS {
                    changes.remove(key);
                }
                changes
            }
        };

        let updated = self
            .store
            .update(entity.table(), |records: &mut Vec<EntityRecord>| {
                let record = records.iter_mut().find(|r| record_has_id(r, id))?;
                record.extend(changes);
                Some(record.clone())
            })
            .await?
            .ok_or_else(|| RecordError::NotFound {
                entity,
                id: id.to_string(),
            })?;
        info!("updated record {} in {}", id, entity);
        Ok(updated)
    }

    /// Delete a record and the artifact it owns.
    pub async fn delete(&self, entity: EntityKind, id: &str) -> RecordResult<EntityRecord> {
        let removed = self
            .store
            .update(entity.table(), |records: &mut Vec<EntityRecord>| {
                let pos = records.iter().position(|r| record_has_id(r, id))?;
                Some(records.remove(pos))
            })
            .await?
            .ok_or_else(|| RecordError::NotFound {
                entity,
                id: id.to_string(),
            })?;

        if let Some(file_name) = removed.get("fileName").and_then(Value::as_str) {
            if ensure_filename_safe(file_name).is_ok() {
                let path = self.downloads_dir.join(file_name);
                match fs::remove_file(&path).await {
                    Ok(_) => debug!("removed artifact {}", path.display()),
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        debug!("artifact {} already missing", path.display());
                    }
                    Err(err) => warn!("failed to remove artifact {}: {}", path.display(), err),
                }
            }
        }
        info!("deleted record {} from {}", id, entity);
        Ok(removed)
    }

    /// Record a contact request from the public site with status `new`.
    pub async fn submit_request(&self, req: ContactRequest) -> RecordResult<EntityRecord> {
        let name = req.name.trim();
        let email = req.email.trim();
        let message = req.message.trim();
        if name.is_empty() || email.is_empty() || message.is_empty() {
            return Err(RecordError::InvalidInput(
                "name, email and message are required".into(),
            ));
        }

        let mut record = EntityRecord::new();
        record.insert("id".into(), Value::from(self.ids.next_id()));
        record.insert("name".into(), Value::from(name));
        record.insert("email".into(), Value::from(email));
        if let Some(phone) = req.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            record.insert("phone".into(), Value::from(phone));
        }
        record.insert("message".into(), Value::from(message));
        record.insert("status".into(), Value::from("new"));
        record.insert(
            "date".into(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        let stored = record.clone();
        self.store
            .update(EntityKind::Requests.table(), |records: &mut Vec<EntityRecord>| {
                records.insert(0, stored)
            })
            .await?;
        info!("new request received from {}", name);
        Ok(record)
    }
}

/// Reduce a request edit to its `status` field.
fn status_change(mut changes: EntityRecord) -> RecordResult<EntityRecord> {
    match changes.remove("status") {
        Some(Value::String(status)) if !status.trim().is_empty() => {
            Ok(EntityRecord::from_iter([("status".to_string(), Value::String(status))]))
        }
        _ => Err(RecordError::InvalidInput(
            "status must be a non-empty string".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn service() -> (TempDir, RecordService) {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::open(dir.path().join("data")).await.unwrap();
        std::fs::create_dir_all(dir.path().join("downloads")).unwrap();
        let service = RecordService::new(store, IdGenerator::new(), dir.path().join("downloads"));
        (dir, service)
    }

    fn fields(value: Value) -> EntityRecord {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn created_records_get_fresh_ids_and_go_first() {
        let (_dir, service) = service().await;
        let first = service
            .create(EntityKind::Courses, fields(json!({"name": "Rust", "id": 1})))
            .await
            .unwrap();
        let second = service
            .create(
                EntityKind::Courses,
                fields(json!({"name": "Go", "fileName": "../../etc/passwd"})),
            )
            .await
            .unwrap();

        assert_ne!(first["id"], json!(1));
        assert!(!second.contains_key("fileName"));
        let names: Vec<_> = service
            .list(EntityKind::Courses)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("Go"), json!("Rust")]);
    }

    #[tokio::test]
    async fn only_catalog_records_are_created_directly() {
        let (_dir, service) = service().await;
        for entity in [EntityKind::Requests, EntityKind::Submissions] {
            let err = service.create(entity, fields(json!({"name": "x"}))).await.unwrap_err();
            assert!(matches!(err, RecordError::ReadOnly { .. }), "{entity}");
        }
    }

    #[tokio::test]
    async fn update_merges_fields_but_keeps_identity() {
        let (_dir, service) = service().await;
        let created = service
            .create(
                EntityKind::Software,
                fields(json!({"name": "Tool", "categoryId": "dev"})),
            )
            .await
            .unwrap();
        let id = created["id"].to_string();

        let updated = service
            .update(
                EntityKind::Software,
                &id,
                fields(json!({"name": "Tool 2", "id": 5, "fileName": "other.bin"})),
            )
            .await
            .unwrap();
        assert_eq!(updated["name"], "Tool 2");
        assert_eq!(updated["categoryId"], "dev");
        assert_eq!(updated["id"], created["id"]);
        assert!(!updated.contains_key("fileName"));

        let stored = service.list(EntityKind::Software).await.unwrap();
        assert_eq!(stored, vec![updated]);

        let err = service
            .update(EntityKind::Software, "404", fields(json!({"name": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::NotFound { .. }));
    }

    #[tokio::test]
    async fn request_intake_and_status_changes() {
        let (_dir, service) = service().await;
        let err = service
            .submit_request(ContactRequest {
                name: "Anna".into(),
                email: " ".into(),
                message: "hi".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::InvalidInput(_)));
        assert!(service.list(EntityKind::Requests).await.unwrap().is_empty());

        let request = service
            .submit_request(ContactRequest {
                name: " Anna ".into(),
                email: "anna@example.com".into(),
                phone: Some(String::new()),
                message: "Need a license".into(),
            })
            .await
            .unwrap();
        assert_eq!(request["name"], "Anna");
        assert_eq!(request["status"], "new");
        assert!(!request.contains_key("phone"));
        assert!(request["date"].as_str().unwrap().ends_with('Z'));

        let id = request["id"].to_string();
        let updated = service
            .update(
                EntityKind::Requests,
                &id,
                fields(json!({"status": "done", "message": "rewritten"})),
            )
            .await
            .unwrap();
        assert_eq!(updated["status"], "done");
        assert_eq!(updated["message"], "Need a license");

        let err = service
            .update(EntityKind::Requests, &id, fields(json!({"status": ""})))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::InvalidInput(_)));
        let err = service
            .update(EntityKind::Submissions, &id, fields(json!({"status": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::ReadOnly { .. }));
    }

    #[tokio::test]
    async fn concurrent_intake_keeps_every_request() {
        let (_dir, service) = service().await;
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .submit_request(ContactRequest {
                            name: format!("user {i}"),
                            email: "u@example.com".into(),
                            message: "hello".into(),
                            ..Default::default()
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(service.list(EntityKind::Requests).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn deleting_a_record_removes_its_artifact() {
        let (dir, service) = service().await;
        let artifact = dir.path().join("downloads").join("1-answers.pdf");
        std::fs::write(&artifact, b"pdf").unwrap();
        service
            .store
            .save(
                EntityKind::Submissions.table(),
                &vec![fields(json!({"id": 7, "fileName": "1-answers.pdf"}))],
            )
            .await
            .unwrap();

        let removed = service.delete(EntityKind::Submissions, "7").await.unwrap();
        assert_eq!(removed["fileName"], "1-answers.pdf");
        assert!(!artifact.exists());
        assert!(matches!(
            service.delete(EntityKind::Submissions, "7").await,
            Err(RecordError::NotFound { .. })
        ));
    }
}
