//! # Storage Module
//!
//! Persistence for the finance tracker: a remote whole-document store
//! (abstracted behind a trait so hosts can plug in their backend), a local
//! JSON snapshot cache for offline fallback, and the schema migration that
//! upgrades documents written by older client versions.

pub mod cache;
pub mod memory;
pub mod migration;
pub mod traits;

pub use cache::JsonSnapshotCache;
pub use memory::MemoryRemoteStore;
pub use traits::{RemoteDocumentStore, RemotePush, SnapshotCache, StorageError};
