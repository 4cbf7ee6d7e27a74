//! Output types: the structured payload, stored records and upload handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One label/value pair read from a form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub label: String,
    pub value: String,
}

impl Field {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// The canonical extraction result: `{ "fields": [ {label, value}, ... ] }`.
///
/// Field order reflects form layout and page order and is preserved through
/// parsing, storage and retrieval. Labels may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuredPayload {
    pub fields: Vec<Field>,
}

/// Placeholder fields returned when no API credential is configured.
const DEMO_FIELDS: &[(&str, &str)] = &[
    ("Full Name", "Jane Sample"),
    ("Date of Birth", "1990-01-01"),
    ("Address", "123 Example Street, Springfield"),
    ("Phone", "555-0100"),
    (
        "Note",
        "Demo mode: set HUGGINGFACE_API_KEY to extract real fields",
    ),
];

impl StructuredPayload {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// The fixed payload stored in demo mode. Identical on every call.
    pub fn demo() -> Self {
        Self {
            fields: DEMO_FIELDS
                .iter()
                .map(|(label, value)| Field::new(*label, *value))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// A persisted extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned primary key; never changes.
    pub id: i64,
    /// Task that produced this record; unique across the store.
    pub task_id: String,
    pub raw_json: StructuredPayload,
    pub created_at: DateTime<Utc>,
    /// Changes only on an explicit update.
    pub updated_at: DateTime<Utc>,
}

/// Transient handle for one upload, owned by the pipeline for the duration
/// of a single call.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub task_id: String,
    pub created_at: DateTime<Utc>,
}

impl UploadTask {
    /// Start a task with a fresh random identifier.
    pub fn new() -> Self {
        Self {
            task_id: Uuid::new_v4().simple().to_string(),
            created_at: Utc::now(),
        }
    }
}

impl Default for UploadTask {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned once an upload has been durably stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub task_id: String,
    pub record_id: i64,
    /// Pages the document was normalised into.
    pub page_count: usize,
    pub field_count: usize,
    /// True when the stored payload is the demo placeholder.
    pub demo: bool,
}
