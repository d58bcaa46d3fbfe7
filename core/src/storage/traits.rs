//! # Storage Traits
//!
//! Abstractions over the two persistence surfaces the sync engine talks to:
//! the remote per-user document store and the local snapshot cache. The
//! domain layer only ever goes through these traits, so backends can be
//! swapped (in-memory for tests, a real document database in production)
//! without touching the sync logic.

use async_trait::async_trait;
use serde_json::Value;
use shared::UserDocument;
use thiserror::Error;
use tokio::sync::broadcast;

/// Failures surfaced by a remote document store.
///
/// The sync engine branches on these: `Conflict` re-runs the merge,
/// `Unavailable` falls back to the local cache, everything else is
/// reported as a sync error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached (network down, backend rejected us).
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// Compare-and-swap guard failed: another session wrote in between.
    #[error("revision conflict: expected {expected:?}, store is at {actual}")]
    Conflict { expected: Option<u64>, actual: u64 },

    /// A conditional write targeted a document that does not exist.
    #[error("no document exists for user {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// A change notification delivered over a remote subscription.
#[derive(Debug, Clone)]
pub struct RemotePush {
    pub document: UserDocument,
    pub revision: u64,
}

/// One whole document per user, read-modify-written wholesale.
///
/// `fetch_document` returns raw JSON rather than a decoded [`UserDocument`]
/// so the caller can run schema migration exactly once, at load time, before
/// anything else sees the data.
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    /// Fetch the current document and its revision, or `None` when the user
    /// has never saved.
    async fn fetch_document(&self, user_id: &str) -> Result<Option<(Value, u64)>, StorageError>;

    /// Replace the document wholesale. `expected_revision` is a
    /// compare-and-swap guard; `None` asserts no document exists yet.
    /// Returns the revision of the new write.
    async fn put_document(
        &self,
        user_id: &str,
        document: &UserDocument,
        expected_revision: Option<u64>,
    ) -> Result<u64, StorageError>;

    /// Subscribe to change pushes for a user. The receiver stays live for
    /// the rest of the session; lagged receivers miss intermediate pushes
    /// but always see the latest one eventually.
    fn subscribe(&self, user_id: &str) -> broadcast::Receiver<RemotePush>;
}

/// Local durable mirror of the last successfully saved document, read when
/// the remote store is unreachable or the device is offline.
pub trait SnapshotCache: Send + Sync {
    fn write_snapshot(&self, document: &UserDocument) -> anyhow::Result<()>;

    /// Raw JSON for the same reason as `fetch_document`: snapshots written
    /// by an older client version still need migration.
    fn read_snapshot(&self) -> anyhow::Result<Option<Value>>;
}
