//! Entity collections persisted as JSON arrays.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

/// One record of an entity collection. Records are free-form objects; the
/// only fields this service relies on are `id` and, for upload-derived
/// records, `fileName` / `downloadUrl`.
pub type EntityRecord = Map<String, Value>;

/// The collections a record can be registered into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Software,
    Courses,
    Exams,
    Requests,
    Submissions,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Software,
        EntityKind::Courses,
        EntityKind::Exams,
        EntityKind::Requests,
        EntityKind::Submissions,
    ];

    /// Name of the backing table (`{table}.json` in the data directory).
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Software => "software",
            EntityKind::Courses => "courses",
            EntityKind::Exams => "exams",
            EntityKind::Requests => "requests",
            EntityKind::Submissions => "submissions",
        }
    }

    /// Whether the public catalog may list this collection.
    pub fn is_public(self) -> bool {
        matches!(
            self,
            EntityKind::Software | EntityKind::Courses | EntityKind::Exams
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.table() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Body of `POST /public/request`, the contact form.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ContactRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Compare a record's `id` with an id taken from a URL path.
///
/// Ids are numbers for records created here, but older collections may
/// carry string ids, so both representations are accepted.
pub fn record_has_id(record: &EntityRecord, id: &str) -> bool {
    match record.get("id") {
        Some(Value::Number(n)) => n.to_string() == id,
        Some(Value::String(s)) => s == id,
        _ => false,
    }
}
