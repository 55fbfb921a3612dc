//! Fieldsync Core Library
//!
//! Offline feature editing with durable queues and reconnect replay.
//!
//! ## Overview
//!
//! Fieldsync lets a client keep mutating a remote-backed feature dataset
//! while disconnected, then reconcile everything once connectivity resumes.
//! Pending mutations and attachments are persisted in transactional local
//! queues; on reconnect the engine replays them to the remote feature
//! service, interprets partial failure, and remaps client-only temporary ids
//! to server-assigned ones.
//!
//! ## Core Principles
//!
//! - **Durable first**: every offline mutation is committed locally before
//!   the caller hears back
//! - **Coalescing by construction**: at most one pending edit per feature,
//!   a later push overwrites the earlier one
//! - **Safe partial failure**: replay fans out per record, fans in on a
//!   wait-for-all barrier, and retains exactly the records that failed
//!
//! ## Quick Start
//!
//! ```ignore
//! use fieldsync_core::{EditOperation, Feature, LayerId, OfflineEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = OfflineEngine::new("~/.fieldsync/data", service)?;
//!
//!     engine.go_offline();
//!
//!     let layer = LayerId::new("streets");
//!     let temp_id = engine
//!         .apply_edit(EditOperation::Add, &layer, feature)
//!         .await?;
//!
//!     // Later, with connectivity restored
//!     let report = engine.go_online().await?;
//!     println!("replay ok: {}", report.success);
//!
//!     Ok(())
//! }
//! ```

pub mod attachments;
pub mod connectivity;
pub mod edits;
pub mod engine;
pub mod error;
pub mod events;
pub mod remote;
pub mod store;
pub mod types;

// Re-exports
pub use attachments::AttachmentQueue;
pub use connectivity::ConnectivityState;
pub use edits::{EditQueue, LAYER_SNAPSHOT_PREFIX};
pub use engine::OfflineEngine;
pub use error::{SyncError, SyncResult};
pub use events::{AttachmentOutcome, EditOutcome, ReplayReport, SyncEvent};
pub use remote::{AttachmentSubmitResult, EditSubmitResult, FeatureService};
pub use store::Store;
pub use types::*;
