//! # In-Memory Remote Store
//!
//! A [`RemoteDocumentStore`] backed by a process-local map. Used by the test
//! suite and by hosts that want an ephemeral backend; it implements the same
//! revision and push semantics a real document database would, including
//! failure injection via [`MemoryRemoteStore::set_available`] so offline and
//! error paths can be exercised deterministically.

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use shared::UserDocument;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use super::traits::{RemoteDocumentStore, RemotePush, StorageError};

struct StoredDocument {
    value: Value,
    revision: u64,
}

pub struct MemoryRemoteStore {
    documents: Mutex<HashMap<String, StoredDocument>>,
    channels: Mutex<HashMap<String, broadcast::Sender<RemotePush>>>,
    available: AtomicBool,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going unreachable (`false`) or recovering.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Inject a document as if another session had written it, notifying
    /// subscribers. Returns the new revision.
    pub fn push_from_other_session(&self, user_id: &str, document: UserDocument) -> u64 {
        let value = serde_json::to_value(&document).expect("document serializes");
        let mut documents = self.documents.lock().unwrap();
        let revision = documents.get(user_id).map_or(1, |d| d.revision + 1);
        documents.insert(user_id.to_string(), StoredDocument { value, revision });
        drop(documents);
        self.notify(user_id, document, revision);
        revision
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("simulated outage".to_string()))
        }
    }

    fn sender_for(&self, user_id: &str) -> broadcast::Sender<RemotePush> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .clone()
    }

    fn notify(&self, user_id: &str, document: UserDocument, revision: u64) {
        // send only fails when nobody is subscribed, which is fine
        let _ = self.sender_for(user_id).send(RemotePush { document, revision });
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteDocumentStore for MemoryRemoteStore {
    async fn fetch_document(&self, user_id: &str) -> Result<Option<(Value, u64)>, StorageError> {
        self.ensure_available()?;
        let documents = self.documents.lock().unwrap();
        Ok(documents
            .get(user_id)
            .map(|stored| (stored.value.clone(), stored.revision)))
    }

    async fn put_document(
        &self,
        user_id: &str,
        document: &UserDocument,
        expected_revision: Option<u64>,
    ) -> Result<u64, StorageError> {
        self.ensure_available()?;
        let value = serde_json::to_value(document)?;
        let mut documents = self.documents.lock().unwrap();

        let current = documents.get(user_id).map(|stored| stored.revision);
        match (expected_revision, current) {
            (None, Some(actual)) => {
                return Err(StorageError::Conflict { expected: None, actual });
            }
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(StorageError::Conflict {
                    expected: Some(expected),
                    actual,
                });
            }
            (Some(_), None) => {
                return Err(StorageError::NotFound(user_id.to_string()));
            }
            _ => {}
        }

        let revision = current.map_or(1, |r| r + 1);
        documents.insert(user_id.to_string(), StoredDocument { value, revision });
        drop(documents);

        debug!("stored document for {} at revision {}", user_id, revision);
        self.notify(user_id, document.clone(), revision);
        Ok(revision)
    }

    fn subscribe(&self, user_id: &str) -> broadcast::Receiver<RemotePush> {
        self.sender_for(user_id).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::{Dashboard, DOCUMENT_VERSION};

    fn document() -> UserDocument {
        let dashboard = Dashboard::new("Personal");
        UserDocument {
            current_dashboard_id: dashboard.id.clone(),
            dashboards: vec![dashboard],
            dashboard_data: HashMap::new(),
            version: DOCUMENT_VERSION,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_put_requires_no_expected_revision() {
        let store = MemoryRemoteStore::new();
        let revision = store.put_document("user", &document(), None).await.unwrap();
        assert_eq!(revision, 1);

        let fetched = store.fetch_document("user").await.unwrap();
        assert_eq!(fetched.unwrap().1, 1);
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = MemoryRemoteStore::new();
        store.put_document("user", &document(), None).await.unwrap();
        store.put_document("user", &document(), Some(1)).await.unwrap();

        let err = store
            .put_document("user", &document(), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict {
                expected: Some(1),
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn puts_notify_subscribers() {
        let store = MemoryRemoteStore::new();
        let mut rx = store.subscribe("user");
        store.put_document("user", &document(), None).await.unwrap();

        let push = rx.recv().await.unwrap();
        assert_eq!(push.revision, 1);
        assert_eq!(push.document.dashboards.len(), 1);
    }

    #[tokio::test]
    async fn outage_surfaces_as_unavailable() {
        let store = MemoryRemoteStore::new();
        store.set_available(false);
        let err = store.fetch_document("user").await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
