//! Edit queue: pending feature mutations, built on the durable store
//!
//! One record per (layer, feature), keyed by `<layer>/<objectId>`. Pushing a
//! later edit for the same feature overwrites the earlier one at the same key,
//! so coalescing happens by construction and no feature can be submitted twice
//! within one replay cycle.
//!
//! The same store also holds layer definition snapshots under a reserved key
//! prefix so an application can restore its offline state across restarts.
//! Those bookkeeping entries never show up in `all_pending()` or
//! `pending_count()`.

use std::path::Path;

use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::store::Store;
use crate::types::{feature_key, EditOperation, EditRecord, Feature, LayerId, QueueUsage};

/// Reserved prefix for layer definition snapshots
pub const LAYER_SNAPSHOT_PREFIX: &str = "__layer/";

const EDITS_TABLE: &str = "edits";
const EDITS_DB_FILE: &str = "edits.redb";

/// Durable queue of pending feature mutations
#[derive(Clone)]
pub struct EditQueue {
    store: Store,
}

impl EditQueue {
    /// Open the edit queue database inside the given data directory
    pub fn open_in(data_dir: impl AsRef<Path>) -> SyncResult<Self> {
        let store = Store::open(data_dir.as_ref().join(EDITS_DB_FILE), EDITS_TABLE)?;
        Ok(Self { store })
    }

    /// Enqueue a mutation for a feature.
    ///
    /// Serializes the feature snapshot and writes it under the composite key.
    /// Any prior pending edit for the same feature is overwritten.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidOperation` if the feature carries no object
    /// id: a queued edit must always be addressable by its composite key.
    pub fn push(
        &self,
        operation: EditOperation,
        layer_id: &LayerId,
        feature: &Feature,
    ) -> SyncResult<EditRecord> {
        let object_id = feature.object_id.ok_or_else(|| {
            SyncError::InvalidOperation("cannot queue an edit for a feature without an id".into())
        })?;

        let record = EditRecord {
            id: feature_key(layer_id, object_id),
            operation,
            layer_id: layer_id.clone(),
            feature: feature.clone(),
            enqueued_at: chrono::Utc::now().timestamp(),
        };

        let data =
            serde_json::to_vec(&record).map_err(|e| SyncError::Serialization(e.to_string()))?;
        self.store.put(&record.id, &data)?;
        debug!(id = %record.id, operation = %record.operation, "edit queued");

        Ok(record)
    }

    /// All pending edit records, bookkeeping entries excluded.
    ///
    /// Order is store-native (lexicographic by key), not push order.
    pub fn all_pending(&self) -> SyncResult<Vec<EditRecord>> {
        let mut records = Vec::new();
        for (key, value) in self.store.scan("")? {
            if key.starts_with(LAYER_SNAPSHOT_PREFIX) {
                continue;
            }
            let record: EditRecord = serde_json::from_slice(&value)
                .map_err(|e| SyncError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Verified delete of a confirmed record.
    ///
    /// Returns `true` only when the record existed and is verifiably gone.
    pub fn remove_confirmed(&self, id: &str) -> SyncResult<bool> {
        self.store.remove_if_present(id)
    }

    /// Number of pending edits, bookkeeping entries excluded
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self
            .store
            .scan("")?
            .iter()
            .filter(|(key, _)| !key.starts_with(LAYER_SNAPSHOT_PREFIX))
            .count())
    }

    /// Approximate serialized size and count of pending edits
    pub fn usage(&self) -> SyncResult<QueueUsage> {
        let mut usage = QueueUsage::default();
        for (key, value) in self.store.scan("")? {
            if key.starts_with(LAYER_SNAPSHOT_PREFIX) {
                continue;
            }
            usage.size_bytes += value.len() as u64;
            usage.record_count += 1;
        }
        Ok(usage)
    }

    /// Full reset.
    ///
    /// CAUTION: also removes records of edits that never reached the server,
    /// plus all layer snapshots.
    pub fn clear(&self) -> SyncResult<()> {
        self.store.clear()
    }

    /// Persist a layer definition snapshot under the reserved prefix
    pub fn put_layer_snapshot(
        &self,
        layer_id: &LayerId,
        definition: &serde_json::Value,
    ) -> SyncResult<()> {
        let key = format!("{}{}", LAYER_SNAPSHOT_PREFIX, layer_id);
        let data =
            serde_json::to_vec(definition).map_err(|e| SyncError::Serialization(e.to_string()))?;
        self.store.put(&key, &data)
    }

    /// Load a layer definition snapshot, if one was stored
    pub fn layer_snapshot(&self, layer_id: &LayerId) -> SyncResult<Option<serde_json::Value>> {
        let key = format!("{}{}", LAYER_SNAPSHOT_PREFIX, layer_id);
        match self.store.get(&key)? {
            Some(data) => {
                let value = serde_json::from_slice(&data)
                    .map_err(|e| SyncError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All stored layer snapshots
    pub fn layer_snapshots(&self) -> SyncResult<Vec<(LayerId, serde_json::Value)>> {
        let mut snapshots = Vec::new();
        for (key, value) in self.store.scan(LAYER_SNAPSHOT_PREFIX)? {
            let layer_id = LayerId::new(&key[LAYER_SNAPSHOT_PREFIX.len()..]);
            let definition = serde_json::from_slice(&value)
                .map_err(|e| SyncError::Serialization(e.to_string()))?;
            snapshots.push((layer_id, definition));
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;
    use tempfile::TempDir;

    fn create_test_queue() -> (EditQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let queue = EditQueue::open_in(temp_dir.path()).unwrap();
        (queue, temp_dir)
    }

    fn test_feature(object_id: ObjectId, note: &str) -> Feature {
        let mut attributes = serde_json::Map::new();
        attributes.insert("note".to_string(), serde_json::json!(note));
        Feature::new(serde_json::json!({"x": 1.0, "y": 2.0}), attributes)
            .with_object_id(object_id)
    }

    #[test]
    fn test_push_and_list() {
        let (queue, _temp) = create_test_queue();
        let layer = LayerId::new("streets");

        let record = queue
            .push(
                EditOperation::Add,
                &layer,
                &test_feature(ObjectId::Local(-1), "a"),
            )
            .unwrap();
        assert_eq!(record.id, "streets/-1");

        let pending = queue.all_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], record);
    }

    #[test]
    fn test_push_without_id_is_rejected() {
        let (queue, _temp) = create_test_queue();
        let layer = LayerId::new("streets");
        let feature = Feature::new(serde_json::json!({}), Default::default());

        let result = queue.push(EditOperation::Add, &layer, &feature);
        assert!(matches!(result, Err(SyncError::InvalidOperation(_))));
    }

    #[test]
    fn test_coalescing_keeps_only_latest_edit() {
        let (queue, _temp) = create_test_queue();
        let layer = LayerId::new("streets");

        queue
            .push(
                EditOperation::Add,
                &layer,
                &test_feature(ObjectId::Local(-1), "first"),
            )
            .unwrap();
        let second = queue
            .push(
                EditOperation::Update,
                &layer,
                &test_feature(ObjectId::Local(-1), "second"),
            )
            .unwrap();

        let pending = queue.all_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], second);
        assert_eq!(pending[0].operation, EditOperation::Update);
    }

    #[test]
    fn test_distinct_features_count_separately() {
        let (queue, _temp) = create_test_queue();
        let layer = LayerId::new("streets");

        for n in 1..=4 {
            queue
                .push(
                    EditOperation::Add,
                    &layer,
                    &test_feature(ObjectId::Local(-n), "x"),
                )
                .unwrap();
        }
        assert_eq!(queue.pending_count().unwrap(), 4);

        queue.clear().unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_remove_confirmed_is_verified() {
        let (queue, _temp) = create_test_queue();
        let layer = LayerId::new("streets");

        let record = queue
            .push(
                EditOperation::Add,
                &layer,
                &test_feature(ObjectId::Local(-1), "a"),
            )
            .unwrap();

        assert!(queue.remove_confirmed(&record.id).unwrap());
        assert!(!queue.remove_confirmed(&record.id).unwrap());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_layer_snapshots_excluded_from_pending() {
        let (queue, _temp) = create_test_queue();
        let layer = LayerId::new("streets");

        queue
            .put_layer_snapshot(&layer, &serde_json::json!({"fields": []}))
            .unwrap();
        queue
            .push(
                EditOperation::Add,
                &layer,
                &test_feature(ObjectId::Local(-1), "a"),
            )
            .unwrap();

        assert_eq!(queue.pending_count().unwrap(), 1);
        assert_eq!(queue.all_pending().unwrap().len(), 1);
        assert_eq!(queue.usage().unwrap().record_count, 1);

        let snapshot = queue.layer_snapshot(&layer).unwrap();
        assert_eq!(snapshot, Some(serde_json::json!({"fields": []})));
        assert_eq!(queue.layer_snapshots().unwrap().len(), 1);
    }

    #[test]
    fn test_usage_counts_serialized_bytes() {
        let (queue, _temp) = create_test_queue();
        let layer = LayerId::new("streets");

        queue
            .push(
                EditOperation::Add,
                &layer,
                &test_feature(ObjectId::Local(-1), "a"),
            )
            .unwrap();
        let usage = queue.usage().unwrap();
        assert_eq!(usage.record_count, 1);
        assert!(usage.size_bytes > 0);
    }

    #[test]
    fn test_queue_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let layer = LayerId::new("streets");

        {
            let queue = EditQueue::open_in(temp_dir.path()).unwrap();
            queue
                .push(
                    EditOperation::Add,
                    &layer,
                    &test_feature(ObjectId::Local(-1), "a"),
                )
                .unwrap();
        }

        {
            let queue = EditQueue::open_in(temp_dir.path()).unwrap();
            assert_eq!(queue.pending_count().unwrap(), 1);
        }
    }
}
