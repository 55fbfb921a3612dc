//! Attachment queue: pending binary attachments, independent of the edit queue
//!
//! Attachments live in their own database and reference their owning feature
//! only through the composite `<layer>/<objectId>` key. That back-reference is
//! a lookup key, never an owning pointer: when a feature's temporary id is
//! replaced by a server id during replay, `replace_feature_id` rewrites every
//! matching record in place.
//!
//! Each stored attachment also gets a spill file on disk so the caller can
//! hand the content to a viewer before the upload ever happens. The spill
//! file must be revoked before its record is removed, otherwise the handle
//! leaks.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::store::Store;
use crate::types::{
    feature_key, AttachmentId, AttachmentRecord, LayerId, ObjectId, QueueUsage,
};

const ATTACHMENTS_TABLE: &str = "attachments";
const ATTACHMENTS_DB_FILE: &str = "attachments.redb";
const SPILL_DIR: &str = "attachments";

/// Durable queue of pending binary attachments
#[derive(Clone)]
pub struct AttachmentQueue {
    store: Store,
    spill_dir: PathBuf,
}

impl AttachmentQueue {
    /// Open the attachment queue database and spill directory inside the
    /// given data directory
    pub fn open_in(data_dir: impl AsRef<Path>) -> SyncResult<Self> {
        let data_dir = data_dir.as_ref();
        let store = Store::open(data_dir.join(ATTACHMENTS_DB_FILE), ATTACHMENTS_TABLE)?;
        let spill_dir = data_dir.join(SPILL_DIR);
        std::fs::create_dir_all(&spill_dir)
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
        Ok(Self { store, spill_dir })
    }

    fn record_key(id: AttachmentId) -> String {
        id.0.to_string()
    }

    fn spill_path(&self, id: AttachmentId) -> PathBuf {
        self.spill_dir.join(format!("att{}.bin", id.0))
    }

    /// Persist an attachment: metadata, content, and a spill file for
    /// immediate local use before upload
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        layer_id: &LayerId,
        id: AttachmentId,
        object_id: ObjectId,
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: Bytes,
    ) -> SyncResult<AttachmentRecord> {
        let local_path = self.spill_path(id);
        std::fs::write(&local_path, &content)?;

        let record = AttachmentRecord {
            id,
            object_id,
            feature_id: feature_key(layer_id, object_id),
            layer_id: layer_id.clone(),
            name: name.into(),
            content_type: content_type.into(),
            size: content.len() as u64,
            content: content.to_vec(),
            local_path: Some(local_path),
        };

        let data =
            serde_json::to_vec(&record).map_err(|e| SyncError::Serialization(e.to_string()))?;
        self.store.put(&Self::record_key(id), &data)?;
        debug!(id = %record.id, feature = %record.feature_id, "attachment queued");

        Ok(record)
    }

    /// Load a single attachment by id
    pub fn get(&self, id: AttachmentId) -> SyncResult<Option<AttachmentRecord>> {
        match self.store.get(&Self::record_key(id))? {
            Some(data) => {
                let record = serde_json::from_slice(&data)
                    .map_err(|e| SyncError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Local attachments owned by the given feature.
    ///
    /// Returns local records only; server-known attachments are never merged
    /// in here.
    pub fn by_feature(&self, feature_id: &str) -> SyncResult<Vec<AttachmentRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|record| record.feature_id == feature_id)
            .collect())
    }

    /// Delete a single attachment, revoking its spill file first.
    ///
    /// Returns `false` if no such attachment exists.
    pub fn delete(&self, id: AttachmentId) -> SyncResult<bool> {
        let record = match self.get(id)? {
            Some(record) => record,
            None => return Ok(false),
        };

        self.revoke_spill(&record);
        self.store.remove_if_present(&Self::record_key(id))
    }

    /// Delete every attachment owned by a feature; used when a feature
    /// created offline is deleted before it ever reached the server.
    ///
    /// Returns the number of attachments removed; zero matches is fine.
    pub fn delete_by_feature(&self, feature_id: &str) -> SyncResult<usize> {
        let mut deleted = 0;
        for record in self.by_feature(feature_id)? {
            if self.delete(record.id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Rewrite the owning feature id on every attachment that references the
    /// old one.
    ///
    /// Idempotent and safe with zero matches. Called exactly once per
    /// successful ADD replay that produced a server id.
    pub fn replace_feature_id(
        &self,
        layer_id: &LayerId,
        old: ObjectId,
        new: ObjectId,
    ) -> SyncResult<usize> {
        let old_feature_id = feature_key(layer_id, old);
        let mut replaced = 0;

        for mut record in self.by_feature(&old_feature_id)? {
            record.object_id = new;
            record.feature_id = feature_key(layer_id, new);
            let data = serde_json::to_vec(&record)
                .map_err(|e| SyncError::IdRemappingFailed(e.to_string()))?;
            self.store
                .put(&Self::record_key(record.id), &data)
                .map_err(|e| SyncError::IdRemappingFailed(e.to_string()))?;
            replaced += 1;
        }

        if replaced > 0 {
            debug!(%old, %new, replaced, "attachment feature ids remapped");
        }
        Ok(replaced)
    }

    /// All pending attachments
    pub fn all(&self) -> SyncResult<Vec<AttachmentRecord>> {
        let mut records = Vec::new();
        for (_, value) in self.store.scan("")? {
            let record: AttachmentRecord = serde_json::from_slice(&value)
                .map_err(|e| SyncError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Approximate serialized size and count of pending attachments
    pub fn usage(&self) -> SyncResult<QueueUsage> {
        let mut usage = QueueUsage::default();
        for (_, value) in self.store.scan("")? {
            usage.size_bytes += value.len() as u64;
            usage.record_count += 1;
        }
        Ok(usage)
    }

    /// Remove every attachment, revoking all spill files first
    pub fn clear(&self) -> SyncResult<()> {
        for record in self.all()? {
            self.revoke_spill(&record);
        }
        self.store.clear()
    }

    fn revoke_spill(&self, record: &AttachmentRecord) {
        if let Some(path) = &record.local_path {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(id = %record.id, error = %e, "failed to revoke attachment spill file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_queue() -> (AttachmentQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let queue = AttachmentQueue::open_in(temp_dir.path()).unwrap();
        (queue, temp_dir)
    }

    fn store_test_attachment(
        queue: &AttachmentQueue,
        id: i64,
        object_id: ObjectId,
    ) -> AttachmentRecord {
        queue
            .store(
                &LayerId::new("streets"),
                AttachmentId(id),
                object_id,
                "photo.jpg",
                "image/jpeg",
                Bytes::from_static(b"jpeg bytes"),
            )
            .unwrap()
    }

    #[test]
    fn test_store_writes_spill_file() {
        let (queue, _temp) = create_test_queue();
        let record = store_test_attachment(&queue, -1, ObjectId::Local(-5));

        assert_eq!(record.feature_id, "streets/-5");
        assert_eq!(record.size, 10);
        let path = record.local_path.as_ref().unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(path).unwrap(), b"jpeg bytes");
    }

    #[test]
    fn test_by_feature_filters() {
        let (queue, _temp) = create_test_queue();
        store_test_attachment(&queue, -1, ObjectId::Local(-5));
        store_test_attachment(&queue, -2, ObjectId::Local(-5));
        store_test_attachment(&queue, -3, ObjectId::Remote(7));

        assert_eq!(queue.by_feature("streets/-5").unwrap().len(), 2);
        assert_eq!(queue.by_feature("streets/7").unwrap().len(), 1);
        assert_eq!(queue.by_feature("streets/99").unwrap().len(), 0);
    }

    #[test]
    fn test_delete_revokes_spill_file() {
        let (queue, _temp) = create_test_queue();
        let record = store_test_attachment(&queue, -1, ObjectId::Local(-5));
        let path = record.local_path.clone().unwrap();

        assert!(queue.delete(record.id).unwrap());
        assert!(!path.exists());
        assert!(queue.get(record.id).unwrap().is_none());

        // already gone
        assert!(!queue.delete(record.id).unwrap());
    }

    #[test]
    fn test_delete_by_feature() {
        let (queue, _temp) = create_test_queue();
        store_test_attachment(&queue, -1, ObjectId::Local(-3));
        store_test_attachment(&queue, -2, ObjectId::Local(-3));
        store_test_attachment(&queue, -4, ObjectId::Local(-9));

        assert_eq!(queue.delete_by_feature("streets/-3").unwrap(), 2);
        assert_eq!(queue.by_feature("streets/-3").unwrap().len(), 0);
        assert_eq!(queue.all().unwrap().len(), 1);

        // zero matches is fine
        assert_eq!(queue.delete_by_feature("streets/-3").unwrap(), 0);
    }

    #[test]
    fn test_replace_feature_id_migrates_all_matches() {
        let (queue, _temp) = create_test_queue();
        let layer = LayerId::new("streets");
        store_test_attachment(&queue, -1, ObjectId::Local(-5));
        store_test_attachment(&queue, -2, ObjectId::Local(-5));
        store_test_attachment(&queue, -3, ObjectId::Local(-6));

        let replaced = queue
            .replace_feature_id(&layer, ObjectId::Local(-5), ObjectId::Remote(101))
            .unwrap();
        assert_eq!(replaced, 2);

        assert!(queue.by_feature("streets/-5").unwrap().is_empty());
        let moved = queue.by_feature("streets/101").unwrap();
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|a| a.object_id == ObjectId::Remote(101)));

        // untouched sibling
        assert_eq!(queue.by_feature("streets/-6").unwrap().len(), 1);
    }

    #[test]
    fn test_replace_feature_id_is_idempotent() {
        let (queue, _temp) = create_test_queue();
        let layer = LayerId::new("streets");
        store_test_attachment(&queue, -1, ObjectId::Local(-5));

        queue
            .replace_feature_id(&layer, ObjectId::Local(-5), ObjectId::Remote(101))
            .unwrap();
        let second = queue
            .replace_feature_id(&layer, ObjectId::Local(-5), ObjectId::Remote(101))
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(queue.by_feature("streets/101").unwrap().len(), 1);
    }

    #[test]
    fn test_usage_and_clear() {
        let (queue, _temp) = create_test_queue();
        let record = store_test_attachment(&queue, -1, ObjectId::Local(-5));
        let path = record.local_path.clone().unwrap();

        let usage = queue.usage().unwrap();
        assert_eq!(usage.record_count, 1);
        assert!(usage.size_bytes > 0);

        queue.clear().unwrap();
        assert_eq!(queue.usage().unwrap().record_count, 0);
        assert!(!path.exists());
    }
}
