//! Request and result types for the chunked upload protocol.

use crate::models::entity::{EntityKind, EntityRecord};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

/// Body of `POST /api/assemble-chunks`.
///
/// Every field other than the three named ones is carried into the
/// metadata record unchanged (name, category, description, thumbnail, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembleRequest {
    pub original_filename: String,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub total_chunks: u32,
    #[serde(default)]
    pub entity: Option<EntityKind>,
    #[serde(flatten)]
    pub fields: EntityRecord,
}

impl AssembleRequest {
    /// Metadata is registered only when an entity is named and the extra
    /// fields identify the record with a non-empty `name`.
    pub fn registration_target(&self) -> Option<EntityKind> {
        let named = self
            .fields
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| !name.trim().is_empty());
        self.entity.filter(|_| named)
    }
}

/// Acknowledgement for one stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub chunk_number: u32,
    pub size_bytes: u64,
}

/// Outcome of a successful assembly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledArtifact {
    pub file_name: String,
    pub download_url: String,
    pub size_bytes: u64,
    pub etag: String,
    /// Id of the registered metadata record, when one was written.
    pub record_id: Option<u64>,
}

/// A file written in a single request (thumbnail or submission).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub file_name: String,
    pub download_url: String,
    pub size_bytes: u64,
}

/// Client-side form data sends numbers as strings; JSON bodies send numbers.
fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| de::Error::custom(format!("invalid chunk count {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid chunk count `{s}`"))),
        other => Err(de::Error::custom(format!("invalid chunk count {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_fields_are_collected_for_the_record() {
        let req: AssembleRequest = serde_json::from_value(json!({
            "originalFilename": "setup.exe",
            "totalChunks": "3",
            "entity": "software",
            "name": "Tool",
            "categoryId": 7
        }))
        .unwrap();

        assert_eq!(req.total_chunks, 3);
        assert_eq!(req.entity, Some(EntityKind::Software));
        assert_eq!(req.fields.get("name"), Some(&json!("Tool")));
        assert_eq!(req.fields.get("categoryId"), Some(&json!(7)));
        assert!(!req.fields.contains_key("originalFilename"));
        assert_eq!(req.registration_target(), Some(EntityKind::Software));
    }

    #[test]
    fn no_registration_without_a_name() {
        let req: AssembleRequest = serde_json::from_value(json!({
            "originalFilename": "a.zip",
            "totalChunks": 1,
            "entity": "courses",
            "name": "  "
        }))
        .unwrap();
        assert_eq!(req.registration_target(), None);
    }

    #[test]
    fn rejects_non_numeric_chunk_counts() {
        let res = serde_json::from_value::<AssembleRequest>(json!({
            "originalFilename": "a.zip",
            "totalChunks": "many"
        }));
        assert!(res.is_err());
    }
}
