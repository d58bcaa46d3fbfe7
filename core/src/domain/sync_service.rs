//! # Sync Service
//!
//! Offline-first persistence of the entity store against a remote per-user
//! document store. State machine: `Idle -> Syncing -> {Synced | Error}`,
//! with a parallel `Offline` state entered on connectivity loss and exited
//! (back to `Synced`, retrying any deferred save) when it returns.
//!
//! Concurrency across devices is arbitrated by a single timestamp watermark:
//! `last_loaded` records the remote `lastUpdated` as of this session's load.
//! When another session wrote after that watermark, `save` merges before
//! writing — per dashboard, the remote group map is the base and the local
//! map is overlaid on top, so the merge is group-granular. Two sessions
//! adding items to the *same* group while apart will lose the earlier
//! session's items for that group; that window is a documented property of
//! the design, not something this module papers over.
//!
//! Writes carry a revision compare-and-swap guard, so an overlapping save
//! from another session turns into a re-fetch/re-merge retry instead of a
//! blind overwrite.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use shared::{SyncStatus, UserDocument, DOCUMENT_VERSION};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch};

use crate::domain::store::EntityStore;
use crate::storage::migration;
use crate::storage::traits::{RemoteDocumentStore, RemotePush, SnapshotCache, StorageError};

const SAVE_CONFLICT_RETRIES: u32 = 3;

struct SyncInner {
    user_id: Option<String>,
    /// Remote `lastUpdated` as of the last load/save/push — the merge
    /// watermark.
    last_loaded: Option<DateTime<Utc>>,
    /// Remote revision backing the compare-and-swap on save.
    revision: Option<u64>,
    online: bool,
    /// A save was requested while offline; retried on reconnect.
    dirty: bool,
    /// User id whose push subscription is already running.
    subscribed: Option<String>,
}

#[derive(Clone)]
pub struct SyncService {
    store: EntityStore,
    remote: Arc<dyn RemoteDocumentStore>,
    cache: Arc<dyn SnapshotCache>,
    inner: Arc<RwLock<SyncInner>>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
}

impl SyncService {
    pub fn new(
        store: EntityStore,
        remote: Arc<dyn RemoteDocumentStore>,
        cache: Arc<dyn SnapshotCache>,
    ) -> Self {
        let (status_tx, _status_rx) = watch::channel(SyncStatus::Idle);
        Self {
            store,
            remote,
            cache,
            inner: Arc::new(RwLock::new(SyncInner {
                user_id: None,
                last_loaded: None,
                revision: None,
                online: true,
                dirty: false,
                subscribed: None,
            })),
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch channel for the UI status badge.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.inner.read().unwrap().online
    }

    /// Revision of the remote document this session last loaded or wrote.
    pub fn last_revision(&self) -> Option<u64> {
        self.inner.read().unwrap().revision
    }

    fn set_status(&self, status: SyncStatus) {
        self.status_tx.send_replace(status);
    }

    /// Load the user's document into the entity store.
    ///
    /// Offline: restore the local snapshot if one exists and stop. Online:
    /// fetch the remote document (seeding it with defaults when absent),
    /// subscribe to remote pushes for the rest of the session, and record
    /// the merge watermark. A failed remote fetch falls back to the local
    /// snapshot.
    pub async fn load(&self, user_id: &str) -> Result<()> {
        info!("loading user data for {}", user_id);
        {
            let mut inner = self.inner.write().unwrap();
            inner.user_id = Some(user_id.to_string());
        }

        if !self.is_online() {
            info!("offline at load; restoring local snapshot");
            return self.restore_from_cache(SyncStatus::Offline);
        }

        match self.remote.fetch_document(user_id).await {
            Ok(Some((raw, revision))) => {
                let document = migration::migrate(raw)?;
                let last_updated = document.last_updated;
                self.store.replace_from_document(document);
                {
                    let mut inner = self.inner.write().unwrap();
                    inner.last_loaded = Some(last_updated);
                    inner.revision = Some(revision);
                    inner.dirty = false;
                }
                self.spawn_push_listener(user_id);
                self.set_status(SyncStatus::Synced);
                info!("loaded remote document at revision {}", revision);
                Ok(())
            }
            Ok(None) => {
                info!("no remote document for {}; seeding defaults", user_id);
                // The freshly constructed store already holds the default
                // dashboard and groups; persist that as the initial document.
                let document = self.store.snapshot_document();
                let revision = self
                    .remote
                    .put_document(user_id, &document, None)
                    .await
                    .context("seeding initial document")?;
                if let Err(err) = self.cache.write_snapshot(&document) {
                    warn!("failed to mirror seeded document locally: {err:#}");
                }
                {
                    let mut inner = self.inner.write().unwrap();
                    inner.last_loaded = Some(document.last_updated);
                    inner.revision = Some(revision);
                    inner.dirty = false;
                }
                self.spawn_push_listener(user_id);
                self.set_status(SyncStatus::Synced);
                Ok(())
            }
            Err(err) => {
                warn!("remote load failed ({err}); falling back to local snapshot");
                self.restore_from_cache(SyncStatus::Error {
                    message: format!("load failed: {err}"),
                })
            }
        }
    }

    fn restore_from_cache(&self, status: SyncStatus) -> Result<()> {
        match self.cache.read_snapshot()? {
            Some(raw) => {
                let document = migration::migrate(raw)?;
                let mut inner = self.inner.write().unwrap();
                inner.last_loaded = Some(document.last_updated);
                drop(inner);
                self.store.replace_from_document(document);
                info!("restored state from local snapshot");
            }
            None => {
                debug!("no local snapshot; keeping seeded defaults");
            }
        }
        self.set_status(status);
        Ok(())
    }

    /// Persist the current in-memory state.
    ///
    /// No-op without a loaded user. While offline the save is deferred
    /// (marked dirty) and retried on reconnect. On any failure the status
    /// flips to `Error` and in-memory state is left untouched.
    pub async fn save(&self) -> Result<()> {
        let (user_id, online) = {
            let inner = self.inner.read().unwrap();
            (inner.user_id.clone(), inner.online)
        };
        let Some(user_id) = user_id else {
            debug!("save requested with no user loaded; ignoring");
            return Ok(());
        };
        if !online {
            self.inner.write().unwrap().dirty = true;
            self.set_status(SyncStatus::Offline);
            debug!("offline; save deferred until reconnect");
            return Ok(());
        }

        self.set_status(SyncStatus::Syncing);
        match self.save_with_merge(&user_id).await {
            Ok(document) => {
                if let Err(err) = self.cache.write_snapshot(&document) {
                    warn!("local snapshot write failed: {err:#}");
                }
                self.inner.write().unwrap().dirty = false;
                self.set_status(SyncStatus::Synced);
                Ok(())
            }
            Err(err) => {
                warn!("save failed: {err:#}");
                self.set_status(SyncStatus::Error {
                    message: format!("{err:#}"),
                });
                Err(err)
            }
        }
    }

    /// Fetch-merge-write with a revision compare-and-swap: a concurrent
    /// writer turns into a `Conflict`, and we re-fetch and re-merge rather
    /// than overwrite what they wrote.
    async fn save_with_merge(&self, user_id: &str) -> Result<UserDocument> {
        for attempt in 1..=SAVE_CONFLICT_RETRIES {
            let fetched = self.remote.fetch_document(user_id).await?;
            let local = self.store.snapshot_document();
            let last_loaded = self.inner.read().unwrap().last_loaded;

            let (expected, document) = match fetched {
                None => (None, local),
                Some((raw, revision)) => {
                    let remote_document = migration::migrate(raw)?;
                    let conflicting_write =
                        last_loaded.map_or(true, |watermark| remote_document.last_updated > watermark);
                    let document = if conflicting_write {
                        info!("remote changed since last load; merging group maps");
                        merge_documents(&remote_document, local)
                    } else {
                        local
                    };
                    (Some(revision), document)
                }
            };

            match self.remote.put_document(user_id, &document, expected).await {
                Ok(revision) => {
                    // Apply the written (possibly merged) document back, so
                    // memory, cache, and remote agree without waiting for
                    // the echo push.
                    self.store.replace_from_document(document.clone());
                    let mut inner = self.inner.write().unwrap();
                    inner.last_loaded = Some(document.last_updated);
                    inner.revision = Some(revision);
                    return Ok(document);
                }
                Err(StorageError::Conflict { .. }) => {
                    warn!(
                        "revision conflict during save (attempt {attempt}/{SAVE_CONFLICT_RETRIES}); re-merging"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(anyhow!(
            "save abandoned after {SAVE_CONFLICT_RETRIES} revision conflicts"
        ))
    }

    /// Fire-and-forget save, invoked by every mutating service call. Errors
    /// surface through the status channel rather than the caller.
    pub fn request_save(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let service = self.clone();
                handle.spawn(async move {
                    if let Err(err) = service.save().await {
                        warn!("background save failed: {err:#}");
                    }
                });
            }
            Err(_) => {
                warn!("save requested outside an async runtime; state kept in memory only");
            }
        }
    }

    /// Entry point for environment online/offline transition events.
    /// Going offline flips the status; coming back online re-enters
    /// `Synced` and retries a save that was deferred while offline.
    pub async fn handle_connectivity_change(&self, online: bool) -> Result<()> {
        let (was_online, dirty) = {
            let mut inner = self.inner.write().unwrap();
            let was_online = inner.online;
            inner.online = online;
            (was_online, inner.dirty)
        };

        if !online {
            if was_online {
                info!("connectivity lost; entering offline mode");
            }
            self.set_status(SyncStatus::Offline);
            return Ok(());
        }
        if was_online {
            return Ok(());
        }

        info!("connectivity restored");
        self.set_status(SyncStatus::Synced);
        if dirty {
            info!("retrying save deferred while offline");
            self.save().await?;
        }
        Ok(())
    }

    fn spawn_push_listener(&self, user_id: &str) {
        {
            let mut inner = self.inner.write().unwrap();
            if inner.subscribed.as_deref() == Some(user_id) {
                return;
            }
            inner.subscribed = Some(user_id.to_string());
        }

        let mut receiver = self.remote.subscribe(user_id);
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(push) => service.apply_remote_push(push),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("{missed} remote pushes dropped; the next push carries the latest state");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// A remote push replaces in-memory dashboards wholesale — last push
    /// wins on the read path, even over unsaved local edits.
    fn apply_remote_push(&self, push: RemotePush) {
        debug!("applying remote push at revision {}", push.revision);
        let last_updated = push.document.last_updated;
        self.store.replace_from_document(push.document);
        let mut inner = self.inner.write().unwrap();
        inner.last_loaded = Some(last_updated);
        inner.revision = Some(push.revision);
    }
}

/// Merge a conflicting remote document with the local state. Per dashboard
/// the remote group map is the base and the local map is overlaid on top:
/// local wins on a group-id collision, remote-only groups are preserved.
/// The dashboard list is united by id with local names winning, and the
/// local current-dashboard selection is kept.
pub fn merge_documents(remote: &UserDocument, local: UserDocument) -> UserDocument {
    let mut dashboards = remote.dashboards.clone();
    for local_dashboard in local.dashboards {
        match dashboards.iter_mut().find(|d| d.id == local_dashboard.id) {
            Some(existing) => existing.name = local_dashboard.name,
            None => dashboards.push(local_dashboard),
        }
    }

    let mut dashboard_data = remote.dashboard_data.clone();
    for (dashboard_id, local_data) in local.dashboard_data {
        match dashboard_data.entry(dashboard_id) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let merged = entry.get_mut();
                for (group_id, group) in local_data.schedule_groups {
                    merged.schedule_groups.insert(group_id, group);
                }
                merged.last_modified = merged.last_modified.max(local_data.last_modified);
                merged.shared_with = local_data.shared_with;
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(local_data);
            }
        }
    }

    UserDocument {
        dashboards,
        current_dashboard_id: local.current_dashboard_id,
        dashboard_data,
        version: DOCUMENT_VERSION,
        last_updated: local.last_updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::ItemDraft;
    use crate::storage::cache::JsonSnapshotCache;
    use crate::storage::memory::MemoryRemoteStore;
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate};
    use serde_json::Value;
    use shared::{Dashboard, DashboardData, ScheduleGroup};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn service_with(
        remote: Arc<dyn RemoteDocumentStore>,
        cache_dir: &std::path::Path,
    ) -> (SyncService, EntityStore) {
        let store = EntityStore::new();
        let cache = Arc::new(JsonSnapshotCache::new(cache_dir).unwrap());
        (SyncService::new(store.clone(), remote, cache), store)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn document_with_groups(group_titles: &[(&str, &str)]) -> UserDocument {
        let dashboard = Dashboard::new("Personal");
        let mut groups = HashMap::new();
        for (id, title) in group_titles {
            let mut group = ScheduleGroup::new(*title, false, Vec::new(), 0);
            group.id = id.to_string();
            groups.insert(id.to_string(), group);
        }
        UserDocument {
            current_dashboard_id: dashboard.id.clone(),
            dashboard_data: HashMap::from([(
                dashboard.id.clone(),
                DashboardData {
                    schedule_groups: groups,
                    last_modified: Utc::now(),
                    shared_with: Vec::new(),
                },
            )]),
            dashboards: vec![dashboard],
            version: DOCUMENT_VERSION,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn merge_overlays_local_groups_on_remote_base() {
        // remote {A, B}, local {B', C} => {A, B', C}
        let remote = document_with_groups(&[("A", "remote a"), ("B", "remote b")]);
        let mut local = document_with_groups(&[("B", "local b"), ("C", "local c")]);
        // same dashboard id on both sides
        local.dashboards = remote.dashboards.clone();
        local.current_dashboard_id = remote.current_dashboard_id.clone();
        let data = local
            .dashboard_data
            .drain()
            .map(|(_, data)| data)
            .next()
            .unwrap();
        local.dashboard_data = HashMap::from([(remote.dashboards[0].id.clone(), data)]);

        let merged = merge_documents(&remote, local);
        let groups = &merged.dashboard_data[&remote.dashboards[0].id].schedule_groups;
        assert_eq!(groups.len(), 3);
        assert_eq!(groups["A"].title, "remote a");
        assert_eq!(groups["B"].title, "local b");
        assert_eq!(groups["C"].title, "local c");
    }

    #[test]
    fn merge_preserves_remote_only_dashboards() {
        let remote = document_with_groups(&[("A", "remote a")]);
        let local = document_with_groups(&[("B", "local b")]);
        let local_dashboard_id = local.dashboards[0].id.clone();

        let merged = merge_documents(&remote, local);
        assert_eq!(merged.dashboards.len(), 2);
        assert!(merged.dashboard_data.contains_key(&remote.dashboards[0].id));
        assert!(merged.dashboard_data.contains_key(&local_dashboard_id));
        assert_eq!(merged.current_dashboard_id, local_dashboard_id);
    }

    #[tokio::test]
    async fn load_seeds_remote_when_empty() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = service_with(remote.clone(), dir.path());

        sync.load("user-1").await.unwrap();

        assert_eq!(sync.status(), SyncStatus::Synced);
        assert_eq!(sync.last_revision(), Some(1));
        let (_, revision) = remote.fetch_document("user-1").await.unwrap().unwrap();
        assert_eq!(revision, 1);
        assert_eq!(store.dashboards().len(), 1);
    }

    #[tokio::test]
    async fn save_without_user_is_a_noop() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let dir = tempfile::tempdir().unwrap();
        let (sync, _store) = service_with(remote.clone(), dir.path());

        sync.save().await.unwrap();
        assert_eq!(sync.status(), SyncStatus::Idle);
        assert!(remote.fetch_document("user-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn two_sessions_union_their_groups() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let dir_one = tempfile::tempdir().unwrap();
        let dir_two = tempfile::tempdir().unwrap();

        let (sync_one, store_one) = service_with(remote.clone(), dir_one.path());
        sync_one.load("user-1").await.unwrap();

        let (sync_two, store_two) = service_with(remote.clone(), dir_two.path());
        sync_two.load("user-1").await.unwrap();

        // Session two writes a new group after session one's load.
        store_two.add_group("From Two", false, Vec::new());
        sync_two.save().await.unwrap();

        // Session one saves its own new group; the remote changed since its
        // watermark, so its save merges and keeps both.
        store_one.add_group("From One", false, Vec::new());
        sync_one.save().await.unwrap();

        let groups = store_one.active_groups();
        let titles: Vec<&str> = groups.values().map(|g| g.title.as_str()).collect();
        assert!(titles.contains(&"From One"));
        assert!(titles.contains(&"From Two"));
        assert_eq!(sync_one.status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn offline_save_is_deferred_and_retried_on_reconnect() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = service_with(remote.clone(), dir.path());
        sync.load("user-1").await.unwrap();

        sync.handle_connectivity_change(false).await.unwrap();
        assert_eq!(sync.status(), SyncStatus::Offline);

        store.add_group("Written Offline", false, Vec::new());
        sync.save().await.unwrap();
        // nothing reached the remote yet
        let (_, revision) = remote.fetch_document("user-1").await.unwrap().unwrap();
        assert_eq!(revision, 1);
        assert_eq!(sync.status(), SyncStatus::Offline);

        sync.handle_connectivity_change(true).await.unwrap();
        let (value, revision) = remote.fetch_document("user-1").await.unwrap().unwrap();
        assert_eq!(revision, 2);
        assert_eq!(sync.status(), SyncStatus::Synced);
        let raw = serde_json::to_string(&value).unwrap();
        assert!(raw.contains("Written Offline"));
    }

    #[tokio::test]
    async fn failed_save_sets_error_and_preserves_state() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = service_with(remote.clone(), dir.path());
        sync.load("user-1").await.unwrap();

        store.add_group("Unsaved", false, Vec::new());
        let before = store.active_groups();

        remote.set_available(false);
        assert!(sync.save().await.is_err());
        assert!(matches!(sync.status(), SyncStatus::Error { .. }));
        assert_eq!(store.active_groups(), before);
    }

    #[tokio::test]
    async fn load_falls_back_to_cache_when_remote_fails() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let dir = tempfile::tempdir().unwrap();

        let (sync, store) = service_with(remote.clone(), dir.path());
        sync.load("user-1").await.unwrap();
        store.add_group("Cached Group", false, Vec::new());
        sync.save().await.unwrap();

        // A later session on the same device, with the backend unreachable.
        remote.set_available(false);
        let (sync_two, store_two) = service_with(remote.clone(), dir.path());
        sync_two.load("user-1").await.unwrap();

        assert!(matches!(sync_two.status(), SyncStatus::Error { .. }));
        let titles: Vec<String> = store_two
            .active_groups()
            .values()
            .map(|g| g.title.clone())
            .collect();
        assert!(titles.contains(&"Cached Group".to_string()));
    }

    #[tokio::test]
    async fn offline_load_uses_cache_and_reports_offline() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let dir = tempfile::tempdir().unwrap();

        let (sync, store) = service_with(remote.clone(), dir.path());
        sync.load("user-1").await.unwrap();
        store.add_group("Cached Group", false, Vec::new());
        sync.save().await.unwrap();

        let (sync_two, store_two) = service_with(remote.clone(), dir.path());
        sync_two.handle_connectivity_change(false).await.unwrap();
        sync_two.load("user-1").await.unwrap();

        assert_eq!(sync_two.status(), SyncStatus::Offline);
        let titles: Vec<String> = store_two
            .active_groups()
            .values()
            .map(|g| g.title.clone())
            .collect();
        assert!(titles.contains(&"Cached Group".to_string()));
    }

    #[tokio::test]
    async fn remote_push_replaces_in_memory_state() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = service_with(remote.clone(), dir.path());
        sync.load("user-1").await.unwrap();

        let mut pushed = store.snapshot_document();
        pushed.dashboards[0].name = "Renamed Elsewhere".to_string();
        pushed.last_updated = Utc::now() + Duration::seconds(1);
        remote.push_from_other_session("user-1", pushed);

        // give the listener task a chance to run
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(store.dashboards()[0].name, "Renamed Elsewhere");
    }

    /// Remote store whose first put always reports a revision conflict,
    /// as if another session won a race; used to exercise the retry loop.
    struct ConflictOnFirstPut {
        inner: MemoryRemoteStore,
        puts: AtomicU32,
    }

    #[async_trait]
    impl RemoteDocumentStore for ConflictOnFirstPut {
        async fn fetch_document(
            &self,
            user_id: &str,
        ) -> Result<Option<(Value, u64)>, StorageError> {
            self.inner.fetch_document(user_id).await
        }

        async fn put_document(
            &self,
            user_id: &str,
            document: &UserDocument,
            expected_revision: Option<u64>,
        ) -> Result<u64, StorageError> {
            if self.puts.fetch_add(1, Ordering::SeqCst) == 1 {
                // not the seeding put: fail the first real save attempt
                return Err(StorageError::Conflict {
                    expected: expected_revision,
                    actual: expected_revision.unwrap_or(0) + 1,
                });
            }
            self.inner.put_document(user_id, document, expected_revision).await
        }

        fn subscribe(&self, user_id: &str) -> broadcast::Receiver<RemotePush> {
            self.inner.subscribe(user_id)
        }
    }

    #[tokio::test]
    async fn save_retries_after_a_revision_conflict() {
        let remote = Arc::new(ConflictOnFirstPut {
            inner: MemoryRemoteStore::new(),
            puts: AtomicU32::new(0),
        });
        let dir = tempfile::tempdir().unwrap();
        let (sync, store) = service_with(remote.clone(), dir.path());
        sync.load("user-1").await.unwrap();

        store.add_item(
            &store
                .find_group_by_title(&store.current_dashboard_id(), shared::LEDGER_GROUP_TITLE)
                .unwrap(),
            ItemDraft::simple("Coffee", -4.0, date(2024, 3, 1)),
            None,
        );
        sync.save().await.unwrap();

        assert_eq!(sync.status(), SyncStatus::Synced);
        // seeding put + conflicted attempt + successful retry
        assert_eq!(remote.puts.load(Ordering::SeqCst), 3);
    }
}
