//! Remote feature service interface
//!
//! The engine's only outward call path. The orchestrator calls these methods
//! during replay (and for direct writes while online); it never calls them
//! for purely local temp-id deletes. Timeouts are the implementor's concern:
//! the core applies none and will wait indefinitely for a submission to
//! settle.

use crate::types::{AttachmentRecord, EditOperation, Feature, LayerId};

/// Result of submitting one feature mutation
#[derive(Debug, Clone, PartialEq)]
pub struct EditSubmitResult {
    /// Whether the service accepted the mutation
    pub success: bool,
    /// Server-assigned object id (set for a confirmed add)
    pub object_id: Option<i64>,
    /// Service error, when rejected
    pub error: Option<String>,
}

impl EditSubmitResult {
    pub fn ok(object_id: Option<i64>) -> Self {
        Self {
            success: true,
            object_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            object_id: None,
            error: Some(error.into()),
        }
    }
}

/// Result of submitting one attachment upload
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentSubmitResult {
    /// Whether the service acknowledged the upload
    pub success: bool,
    /// Service error, when rejected
    pub error: Option<String>,
}

impl AttachmentSubmitResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// A remote feature service capable of accepting mutations and attachment
/// uploads.
///
/// For an add the submitted feature arrives without an object id (the
/// temporary id is stripped before submission); the service answers with the
/// authoritative id it assigned.
pub trait FeatureService: Send + Sync {
    /// Submit one feature mutation
    fn submit_edit(
        &self,
        operation: EditOperation,
        layer_id: &LayerId,
        feature: &Feature,
    ) -> impl std::future::Future<Output = EditSubmitResult> + Send;

    /// Upload one attachment for its owning feature
    fn submit_attachment(
        &self,
        attachment: &AttachmentRecord,
    ) -> impl std::future::Future<Output = AttachmentSubmitResult> + Send;
}
