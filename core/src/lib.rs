//! # finboard core
//!
//! Client-side engine of the finboard personal finance tracker: dashboards
//! of scheduled and draft transactions, recurring templates projected into
//! concrete occurrences, cross-dashboard transfer pairs, and offline-first
//! synchronization against a remote per-user document store.
//!
//! UI shells hold a [`Backend`] and call its services; there is no global
//! state anywhere. The remote store is injected behind
//! [`storage::RemoteDocumentStore`], so desktop, mobile, and test hosts can
//! each bring their own.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub mod domain;
pub mod storage;

pub use domain::{
    BalanceService, DashboardService, EntityStore, ItemDraft, ItemPatch, Occurrence,
    ScheduleService, SyncService, TransferService,
};
pub use storage::{JsonSnapshotCache, MemoryRemoteStore, RemoteDocumentStore, SnapshotCache};

/// Main backend struct that wires the entity store and all services.
pub struct Backend {
    pub store: EntityStore,
    pub dashboard_service: DashboardService,
    pub schedule_service: ScheduleService,
    pub transfer_service: TransferService,
    pub balance_service: BalanceService,
    pub sync_service: SyncService,
}

impl Backend {
    /// Create a backend against a remote store, caching snapshots under
    /// `cache_directory`.
    pub fn new(remote: Arc<dyn RemoteDocumentStore>, cache_directory: impl AsRef<Path>) -> Result<Self> {
        let store = EntityStore::new();
        let cache = Arc::new(JsonSnapshotCache::new(cache_directory)?);
        let sync_service = SyncService::new(store.clone(), remote, cache);

        let dashboard_service = DashboardService::new(store.clone(), sync_service.clone());
        let schedule_service = ScheduleService::new(store.clone(), sync_service.clone());
        let transfer_service = TransferService::new(store.clone(), sync_service.clone());
        let balance_service = BalanceService::new(store.clone(), sync_service.clone());

        Ok(Backend {
            store,
            dashboard_service,
            schedule_service,
            transfer_service,
            balance_service,
            sync_service,
        })
    }

    /// Load (or seed) the user's document and start listening for remote
    /// changes.
    pub async fn load_user_data(&self, user_id: &str) -> Result<()> {
        self.sync_service.load(user_id).await
    }

    /// Persist the current in-memory state.
    pub async fn save_user_data(&self) -> Result<()> {
        self.sync_service.save().await
    }

    /// Manual sync trigger (the UI's "sync now" affordance); identical to an
    /// explicit save.
    pub async fn sync_dashboard(&self) -> Result<()> {
        self.sync_service.save().await
    }
}
