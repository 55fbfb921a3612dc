//! Main OfflineEngine - the primary entry point for Fieldsync
//!
//! The engine owns both durable queues, the connectivity state, the
//! temporary-id counter, and the replay orchestrator. Application mutations
//! route through [`OfflineEngine::apply_edit`]: while online they forward
//! straight to the remote service, otherwise they land in the queues and wait
//! for the next [`OfflineEngine::go_online`].
//!
//! # Example
//!
//! ```ignore
//! use fieldsync_core::{EditOperation, Feature, LayerId, OfflineEngine};
//!
//! let engine = OfflineEngine::new("~/.fieldsync/data", service)?;
//!
//! engine.go_offline();
//!
//! // Mutations are queued while offline
//! let layer = LayerId::new("streets");
//! let id = engine.apply_edit(EditOperation::Add, &layer, feature).await?;
//!
//! // Reconnect and replay everything
//! let report = engine.go_online().await?;
//! assert!(report.success);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::attachments::AttachmentQueue;
use crate::connectivity::ConnectivityState;
use crate::edits::EditQueue;
use crate::error::{SyncError, SyncResult};
use crate::events::{AttachmentOutcome, EditOutcome, ReplayReport, SyncEvent};
use crate::remote::FeatureService;
use crate::types::{
    feature_key, AttachmentId, AttachmentRecord, EditOperation, EditRecord, Feature, LayerId,
    ObjectId, QueueUsage,
};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine coordinating durable queues, connectivity state, and replay
///
/// All methods take `&self`; queue writes are serialized by the store's own
/// transaction queue (last-write-wins per key), and replay is guarded by a
/// single-flight lock so a reentrant `go_online` cannot race an in-flight one.
pub struct OfflineEngine<S: FeatureService> {
    /// Pending feature mutations
    edits: EditQueue,
    /// Pending binary attachments
    attachments: AttachmentQueue,
    /// The remote collaborator; only ever called from here
    remote: S,
    /// Current connectivity state, mutated only by explicit calls and replay
    /// settlement
    state: parking_lot::Mutex<ConnectivityState>,
    /// Next temporary id to hand out (negative, strictly decreasing)
    next_temp_id: AtomicI64,
    /// Event broadcast channel for observers
    event_tx: broadcast::Sender<SyncEvent>,
    /// Single-flight guard: held for the duration of one replay cycle
    replay_guard: tokio::sync::Mutex<()>,
    /// Data directory path
    data_dir: PathBuf,
}

impl<S: FeatureService> OfflineEngine<S> {
    /// Create a new engine with the given data directory and remote service.
    ///
    /// Creates the directory tree and opens both queue databases. The initial
    /// connectivity state is `Online`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::StorageUnavailable` if the environment provides no
    /// persistent storage; queueing features is disabled in that case.
    pub fn new(data_dir: impl AsRef<Path>, remote: S) -> SyncResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        info!(?data_dir, "initializing OfflineEngine");

        std::fs::create_dir_all(&data_dir)
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;

        let edits = EditQueue::open_in(&data_dir)?;
        let attachments = AttachmentQueue::open_in(&data_dir)?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            edits,
            attachments,
            remote,
            state: parking_lot::Mutex::new(ConnectivityState::Online),
            next_temp_id: AtomicI64::new(-1),
            event_tx,
            replay_guard: tokio::sync::Mutex::new(()),
            data_dir,
        })
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Current connectivity state
    pub fn connectivity_state(&self) -> ConnectivityState {
        *self.state.lock()
    }

    /// Data directory this engine operates on
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Allocate the next temporary id (negative, never reused)
    fn next_temp_id(&self) -> i64 {
        self.next_temp_id.fetch_sub(1, Ordering::SeqCst)
    }

    /// Force the engine offline. Subsequent mutations are stored locally.
    pub fn go_offline(&self) {
        info!("going offline");
        *self.state.lock() = ConnectivityState::Offline;
    }

    /// Return online, replaying all queued work to the remote service.
    ///
    /// Moves to `Reconnecting` for the duration of the replay and to `Online`
    /// unconditionally once it settles, failures included. Failed records
    /// stay queued for the next call; there is no in-cycle retry.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ReplayInProgress` when a replay is already in
    /// flight, or a storage error if the queues themselves fail mid-cycle.
    /// Remote failures are not errors: they are itemized in the report.
    pub async fn go_online(&self) -> SyncResult<ReplayReport> {
        let _guard = self
            .replay_guard
            .try_lock()
            .map_err(|_| SyncError::ReplayInProgress)?;

        *self.state.lock() = ConnectivityState::Reconnecting;
        info!("reconnecting: replaying queued edits");

        let result = self.replay().await;

        // Reaching Online is unconditional, even when items failed
        *self.state.lock() = ConnectivityState::Online;

        match result {
            Ok(report) => {
                self.emit_replay_events(&report);
                info!(
                    success = report.success,
                    edits = report.edits.len(),
                    attachments = report.attachments.len(),
                    "replay settled"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "replay aborted");
                Err(e)
            }
        }
    }

    /// Apply a feature mutation.
    ///
    /// Online: forwards directly to the remote service. Offline or
    /// reconnecting: enqueues locally, assigning a temporary id to an add
    /// that has none yet.
    ///
    /// Returns the id the caller should use for the feature from now on: the
    /// server id for an online add, the temporary id for an offline add, the
    /// feature's own id otherwise.
    pub async fn apply_edit(
        &self,
        operation: EditOperation,
        layer_id: &LayerId,
        mut feature: Feature,
    ) -> SyncResult<ObjectId> {
        if self.connectivity_state().should_enqueue() {
            if operation == EditOperation::Add && feature.object_id.is_none() {
                feature.object_id = Some(ObjectId::Local(self.next_temp_id()));
            }
            let record = match self.edits.push(operation, layer_id, &feature) {
                Ok(record) => record,
                Err(e) => {
                    let _ = self.event_tx.send(SyncEvent::EditsEnqueuedError {
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            };
            let object_id = record
                .feature
                .object_id
                .ok_or_else(|| SyncError::InvalidOperation("queued edit lost its id".into()))?;
            let _ = self.event_tx.send(SyncEvent::EditsEnqueued {
                edits: vec![record.id],
            });
            return Ok(object_id);
        }

        // Online: one direct submission, no queue involvement
        let outgoing = match operation {
            EditOperation::Add => {
                let mut f = feature.clone();
                f.object_id = None;
                f
            }
            _ => feature.clone(),
        };
        let result = self.remote.submit_edit(operation, layer_id, &outgoing).await;
        if !result.success {
            let error = result
                .error
                .unwrap_or_else(|| "remote submission failed".to_string());
            return Err(SyncError::RemoteSubmitFailed(error));
        }

        let object_id = match operation {
            EditOperation::Add => ObjectId::Remote(result.object_id.ok_or_else(|| {
                SyncError::RemoteSubmitFailed("add confirmed without a server id".into())
            })?),
            _ => feature.object_id.ok_or_else(|| {
                SyncError::InvalidOperation("update/delete requires a feature id".into())
            })?,
        };

        let _ = self.event_tx.send(SyncEvent::EditsSent {
            edits: vec![EditOutcome {
                id: feature_key(layer_id, object_id),
                layer_id: layer_id.clone(),
                operation,
                object_id,
                new_object_id: None,
                success: true,
                resolved_locally: false,
                error: None,
                remap_error: None,
            }],
        });
        Ok(object_id)
    }

    /// Add an attachment for a feature.
    ///
    /// Online: uploads directly. Offline or reconnecting: persists the
    /// attachment locally, spill file included, for the next replay.
    pub async fn add_attachment(
        &self,
        layer_id: &LayerId,
        object_id: ObjectId,
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: Bytes,
    ) -> SyncResult<AttachmentRecord> {
        let id = AttachmentId(self.next_temp_id());

        if self.connectivity_state().should_enqueue() {
            let record = self
                .attachments
                .store(layer_id, id, object_id, name, content_type, content)?;
            let _ = self.event_tx.send(SyncEvent::AttachmentEnqueued {
                id: record.id,
                feature_id: record.feature_id.clone(),
            });
            return Ok(record);
        }

        let content = content.to_vec();
        let record = AttachmentRecord {
            id,
            object_id,
            feature_id: feature_key(layer_id, object_id),
            layer_id: layer_id.clone(),
            name: name.into(),
            content_type: content_type.into(),
            size: content.len() as u64,
            content,
            local_path: None,
        };
        let result = self.remote.submit_attachment(&record).await;
        if !result.success {
            let error = result
                .error
                .unwrap_or_else(|| "attachment upload failed".to_string());
            return Err(SyncError::RemoteSubmitFailed(error));
        }

        let _ = self.event_tx.send(SyncEvent::AttachmentsSent {
            attachments: vec![AttachmentOutcome {
                id: record.id,
                feature_id: record.feature_id.clone(),
                success: true,
                error: None,
            }],
        });
        Ok(record)
    }

    /// Load one locally queued attachment by id.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::AttachmentNotFound` if no such attachment is
    /// queued.
    pub fn attachment(&self, id: AttachmentId) -> SyncResult<AttachmentRecord> {
        self.attachments
            .get(id)?
            .ok_or(SyncError::AttachmentNotFound(id.0))
    }

    /// Locally queued attachments for a feature. Never merges server-known
    /// attachments.
    pub fn attachments_for(
        &self,
        layer_id: &LayerId,
        object_id: ObjectId,
    ) -> SyncResult<Vec<AttachmentRecord>> {
        self.attachments.by_feature(&feature_key(layer_id, object_id))
    }

    /// Delete locally queued attachments by id.
    ///
    /// Only locally generated (negative) ids are supported; attachments the
    /// server already knows about are outside this engine's custody.
    pub fn delete_attachments(
        &self,
        ids: &[AttachmentId],
    ) -> SyncResult<Vec<(AttachmentId, bool)>> {
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            if id.0 >= 0 {
                return Err(SyncError::InvalidOperation(format!(
                    "attachment {} is not locally queued",
                    id
                )));
            }
            results.push((id, self.attachments.delete(id)?));
        }
        Ok(results)
    }

    /// Number of pending edits
    pub fn pending_edits_count(&self) -> SyncResult<usize> {
        self.edits.pending_count()
    }

    /// Size accounting for the edit queue
    pub fn edit_usage(&self) -> SyncResult<QueueUsage> {
        self.edits.usage()
    }

    /// Size accounting for the attachment queue
    pub fn attachment_usage(&self) -> SyncResult<QueueUsage> {
        self.attachments.usage()
    }

    /// Persist a layer definition snapshot for offline restarts
    pub fn register_layer(
        &self,
        layer_id: &LayerId,
        definition: &serde_json::Value,
    ) -> SyncResult<()> {
        self.edits.put_layer_snapshot(layer_id, definition)
    }

    /// Load a registered layer definition snapshot
    pub fn layer_snapshot(&self, layer_id: &LayerId) -> SyncResult<Option<serde_json::Value>> {
        self.edits.layer_snapshot(layer_id)
    }

    /// The replay protocol: snapshot, fan-out, fan-in, reconcile, prune.
    ///
    /// Storage errors abort the cycle; remote failures never do — they are
    /// itemized and the records stay queued.
    async fn replay(&self) -> SyncResult<ReplayReport> {
        let mut report = ReplayReport::default();

        // Snapshot of pending edits: coalescing at push time guarantees at
        // most one record, and therefore one submission, per feature
        let pending = self.edits.all_pending()?;

        let mut submissions: Vec<(EditRecord, Option<ObjectId>, Feature)> = Vec::new();
        for record in pending {
            let object_id = match record.feature.object_id {
                Some(object_id) => object_id,
                None => {
                    warn!(id = %record.id, "skipping queued edit without a feature id");
                    continue;
                }
            };

            // A delete of a feature the server never saw is resolved purely
            // locally: drop the record, discard its attachments, submit
            // nothing
            if record.operation == EditOperation::Delete && object_id.is_local() {
                self.edits.remove_confirmed(&record.id)?;
                let discarded = self.attachments.delete_by_feature(&record.id)?;
                debug!(id = %record.id, discarded, "temp-id delete resolved locally");
                report.edits.push(EditOutcome {
                    id: record.id.clone(),
                    layer_id: record.layer_id.clone(),
                    operation: record.operation,
                    object_id,
                    new_object_id: None,
                    success: true,
                    resolved_locally: true,
                    error: None,
                    remap_error: None,
                });
                continue;
            }

            // One independent submission per record; an add goes out without
            // its temporary id, the server assigns the real one
            let mut outgoing = record.feature.clone();
            let temp_id = match record.operation {
                EditOperation::Add => outgoing.object_id.take(),
                _ => None,
            };
            submissions.push((record, temp_id, outgoing));
        }

        // Fan-out, then fan-in: nothing is acted upon until every submission
        // has settled
        let results = futures::future::join_all(submissions.iter().map(
            |(record, _, outgoing)| {
                self.remote
                    .submit_edit(record.operation, &record.layer_id, outgoing)
            },
        ))
        .await;

        for ((record, temp_id, _), result) in submissions.into_iter().zip(results) {
            let object_id = match record.feature.object_id {
                Some(object_id) => object_id,
                None => continue,
            };

            if !result.success {
                // Record retained unchanged; eligible for the next go_online
                report.edits.push(EditOutcome {
                    id: record.id.clone(),
                    layer_id: record.layer_id.clone(),
                    operation: record.operation,
                    object_id,
                    new_object_id: None,
                    success: false,
                    resolved_locally: false,
                    error: Some(
                        result
                            .error
                            .unwrap_or_else(|| "remote submission failed".to_string()),
                    ),
                    remap_error: None,
                });
                continue;
            }

            let mut new_object_id = None;
            let mut remap_error = None;
            if record.operation == EditOperation::Add {
                if let (Some(temp), Some(server)) = (temp_id, result.object_id) {
                    let server_id = ObjectId::Remote(server);
                    new_object_id = Some(server_id);
                    // Remapping must complete before the record counts as
                    // reconciled; a failure is surfaced but does not undo
                    // the add
                    match self.attachments.replace_feature_id(
                        &record.layer_id,
                        temp,
                        server_id,
                    ) {
                        Ok(replaced) => {
                            if replaced > 0 {
                                debug!(id = %record.id, replaced, "attachments remapped");
                            }
                        }
                        Err(e) => {
                            warn!(id = %record.id, error = %e, "attachment remapping failed");
                            remap_error = Some(e.to_string());
                        }
                    }
                }
            }

            self.edits.remove_confirmed(&record.id)?;
            report.edits.push(EditOutcome {
                id: record.id.clone(),
                layer_id: record.layer_id.clone(),
                operation: record.operation,
                object_id,
                new_object_id,
                success: true,
                resolved_locally: false,
                error: None,
                remap_error,
            });
        }

        // Attachment uploads: sequential per feature, one failure never
        // blocks the rest, records removed only on acknowledgement
        let pending_attachments = self.attachments.all()?;
        if !pending_attachments.is_empty() {
            let mut by_feature: BTreeMap<String, Vec<AttachmentRecord>> = BTreeMap::new();
            for attachment in pending_attachments {
                by_feature
                    .entry(attachment.feature_id.clone())
                    .or_default()
                    .push(attachment);
            }

            for (_, group) in by_feature {
                for attachment in group {
                    let result = self.remote.submit_attachment(&attachment).await;
                    if result.success {
                        self.attachments.delete(attachment.id)?;
                        report.attachments.push(AttachmentOutcome {
                            id: attachment.id,
                            feature_id: attachment.feature_id.clone(),
                            success: true,
                            error: None,
                        });
                    } else {
                        report.attachments.push(AttachmentOutcome {
                            id: attachment.id,
                            feature_id: attachment.feature_id.clone(),
                            success: false,
                            error: Some(
                                result
                                    .error
                                    .unwrap_or_else(|| "attachment upload failed".to_string()),
                            ),
                        });
                    }
                }
            }
        }

        report.success = report
            .edits
            .iter()
            .all(|o| o.success && o.remap_error.is_none())
            && report.attachments.iter().all(|o| o.success);
        Ok(report)
    }

    fn emit_replay_events(&self, report: &ReplayReport) {
        let sent: Vec<EditOutcome> = report.succeeded_edits().cloned().collect();
        if !sent.is_empty() {
            let _ = self.event_tx.send(SyncEvent::EditsSent { edits: sent });
        }

        let failures: Vec<EditOutcome> = report.failed_edits().cloned().collect();
        if !failures.is_empty() {
            let _ = self.event_tx.send(SyncEvent::EditsSentError { failures });
        }

        if !report.attachments.is_empty() {
            let _ = self.event_tx.send(SyncEvent::AttachmentsSent {
                attachments: report.attachments.clone(),
            });
        }

        if report.success {
            let _ = self.event_tx.send(SyncEvent::AllEditsSent);
        }
    }
}
