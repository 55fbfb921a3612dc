//! Core types for Fieldsync

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a feature layer
///
/// In the remote service this is the layer endpoint; locally it is the
/// namespace half of every queue key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(pub String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a feature, tagged by who assigned it.
///
/// Features created offline get a `Local` id (negative, monotonically
/// decreasing, never reused within an engine instance) until the remote
/// service confirms the add and issues a `Remote` id. Server ids are assumed
/// nonnegative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectId {
    /// Client-assigned placeholder for a feature created offline
    Local(i64),
    /// Authoritative server-assigned id
    Remote(i64),
}

impl ObjectId {
    /// The raw integer value, regardless of who assigned it
    pub fn raw(&self) -> i64 {
        match self {
            ObjectId::Local(n) | ObjectId::Remote(n) => *n,
        }
    }

    /// Whether this id is a client-only temporary id
    pub fn is_local(&self) -> bool {
        matches!(self, ObjectId::Local(_))
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw())
    }
}

/// Compute the composite key identifying a feature: `<layer>/<objectId>`
///
/// This is both the edit-queue record key and the attachment back-reference.
pub fn feature_key(layer_id: &LayerId, object_id: ObjectId) -> String {
    format!("{}/{}", layer_id, object_id.raw())
}

/// Kind of mutation applied to a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditOperation {
    Add,
    Update,
    Delete,
}

impl EditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditOperation::Add => "add",
            EditOperation::Update => "update",
            EditOperation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for EditOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A feature snapshot: geometry plus attributes, fully serialized.
///
/// Snapshots carry no live references to the application's feature objects so
/// a queued edit survives process restarts unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Identifier of the feature, if it has one yet
    pub object_id: Option<ObjectId>,
    /// Serialized geometry (point/polyline/polygon as JSON)
    pub geometry: serde_json::Value,
    /// Attribute map
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Feature {
    pub fn new(
        geometry: serde_json::Value,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            object_id: None,
            geometry,
            attributes,
        }
    }

    pub fn with_object_id(mut self, object_id: ObjectId) -> Self {
        self.object_id = Some(object_id);
        self
    }
}

/// A pending feature mutation, as persisted in the edit queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRecord {
    /// Composite key: `<layer>/<objectId>`
    pub id: String,
    /// Mutation kind
    pub operation: EditOperation,
    /// Owning layer
    pub layer_id: LayerId,
    /// Feature snapshot at enqueue time
    pub feature: Feature,
    /// Unix timestamp of the enqueue
    pub enqueued_at: i64,
}

/// Identifier of a locally queued attachment.
///
/// Locally generated ids are negative so they stay distinguishable from
/// attachment ids the server issues once the upload is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(pub i64);

impl std::fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending binary attachment, as persisted in the attachment queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Locally generated id
    pub id: AttachmentId,
    /// Owning feature id (temporary or real; rewritten on remap)
    pub object_id: ObjectId,
    /// Composite back-reference: `<layer>/<objectId>` (rewritten on remap)
    pub feature_id: String,
    /// Owning layer
    pub layer_id: LayerId,
    /// File name
    pub name: String,
    /// MIME content type
    pub content_type: String,
    /// Content size in bytes
    pub size: u64,
    /// Binary content
    pub content: Vec<u8>,
    /// Revocable spill file usable by the caller before upload
    pub local_path: Option<PathBuf>,
}

/// Approximate size accounting for a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueUsage {
    /// Serialized size of all records, in bytes
    pub size_bytes: u64,
    /// Number of records
    pub record_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_key_uses_raw_id() {
        let layer = LayerId::new("streets");
        assert_eq!(feature_key(&layer, ObjectId::Local(-5)), "streets/-5");
        assert_eq!(feature_key(&layer, ObjectId::Remote(101)), "streets/101");
    }

    #[test]
    fn test_object_id_tags() {
        assert!(ObjectId::Local(-1).is_local());
        assert!(!ObjectId::Remote(7).is_local());
        assert_eq!(ObjectId::Local(-3).raw(), -3);
    }

    #[test]
    fn test_edit_record_roundtrip() {
        let layer = LayerId::new("streets");
        let feature = Feature::new(serde_json::json!({"x": 1.0, "y": 2.0}), Default::default())
            .with_object_id(ObjectId::Local(-1));
        let record = EditRecord {
            id: feature_key(&layer, ObjectId::Local(-1)),
            operation: EditOperation::Add,
            layer_id: layer,
            feature,
            enqueued_at: 0,
        };
        let bytes = serde_json::to_vec(&record).unwrap();
        let back: EditRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, record);
    }
}
