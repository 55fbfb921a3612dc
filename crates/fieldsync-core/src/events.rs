//! Event types and replay reporting
//!
//! Every queue and replay operation returns a typed result to its caller; the
//! broadcast channel carries the same itemized data to observers but is never
//! the only place a success or failure shows up.

use crate::types::{AttachmentId, EditOperation, LayerId, ObjectId};

/// Outcome of one edit submission within a replay cycle
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    /// Edit record key: `<layer>/<objectId>`
    pub id: String,
    /// Owning layer
    pub layer_id: LayerId,
    /// Mutation kind
    pub operation: EditOperation,
    /// The id the record was queued under
    pub object_id: ObjectId,
    /// Server-assigned id, for a confirmed add
    pub new_object_id: Option<ObjectId>,
    /// Whether the submission settled successfully
    pub success: bool,
    /// True when a temp-id delete was resolved without contacting the server
    pub resolved_locally: bool,
    /// Remote error, for a failed submission
    pub error: Option<String>,
    /// Attachment reassignment error after an otherwise-successful add
    pub remap_error: Option<String>,
}

/// Outcome of one attachment upload within a replay cycle
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentOutcome {
    /// Local attachment id
    pub id: AttachmentId,
    /// Owning feature key at upload time
    pub feature_id: String,
    /// Whether the upload was acknowledged
    pub success: bool,
    /// Remote error, for a failed upload
    pub error: Option<String>,
}

/// Consolidated result of one `go_online()` replay cycle.
///
/// `success` is true only if no edit and no attachment submission failed.
/// Reaching `Online` with failures present is not itself an error; failed
/// records stay queued and become eligible for the next cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// Overall success of the cycle
    pub success: bool,
    /// Itemized edit outcomes, settled and failed alike
    pub edits: Vec<EditOutcome>,
    /// Itemized attachment outcomes
    pub attachments: Vec<AttachmentOutcome>,
}

impl ReplayReport {
    /// Edit outcomes that settled successfully
    pub fn succeeded_edits(&self) -> impl Iterator<Item = &EditOutcome> {
        self.edits.iter().filter(|o| o.success)
    }

    /// Edit outcomes that failed and remain queued
    pub fn failed_edits(&self) -> impl Iterator<Item = &EditOutcome> {
        self.edits.iter().filter(|o| !o.success)
    }

    /// Attachment outcomes that failed and remain queued
    pub fn failed_attachments(&self) -> impl Iterator<Item = &AttachmentOutcome> {
        self.attachments.iter().filter(|o| !o.success)
    }
}

/// Events broadcast by the engine to observers
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Offline mutations were stored in the edit queue
    EditsEnqueued {
        /// Record keys that were written
        edits: Vec<String>,
    },
    /// An offline mutation could not be stored
    EditsEnqueuedError {
        /// What went wrong
        error: String,
    },
    /// Replay submissions settled successfully for these records
    EditsSent {
        /// Outcomes of the settled submissions
        edits: Vec<EditOutcome>,
    },
    /// Some replay submissions failed; the records stay queued
    EditsSentError {
        /// Outcomes of the failed submissions
        failures: Vec<EditOutcome>,
    },
    /// Every queued edit (and attachment, if any) settled successfully
    AllEditsSent,
    /// An offline attachment was stored in the attachment queue
    AttachmentEnqueued {
        /// Local attachment id
        id: AttachmentId,
        /// Owning feature key
        feature_id: String,
    },
    /// Attachment uploads settled; carries successes and failures alike
    AttachmentsSent {
        /// Outcomes of the uploads
        attachments: Vec<AttachmentOutcome>,
    },
}
