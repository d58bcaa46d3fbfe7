//! Dashboard lifecycle: create, rename, remove, and the active-dashboard
//! selection. The collection is never allowed to become empty.

use anyhow::Result;
use log::{info, warn};

use crate::domain::commands::dashboard::{
    AddDashboardCommand, AddDashboardResult, ListDashboardsResult, RemoveDashboardCommand,
    RemoveDashboardResult, RenameDashboardCommand, RenameDashboardResult,
    SetCurrentDashboardCommand,
};
use crate::domain::store::EntityStore;
use crate::domain::sync_service::SyncService;

#[derive(Clone)]
pub struct DashboardService {
    store: EntityStore,
    sync: SyncService,
}

impl DashboardService {
    pub fn new(store: EntityStore, sync: SyncService) -> Self {
        Self { store, sync }
    }

    pub fn list_dashboards(&self) -> ListDashboardsResult {
        ListDashboardsResult {
            dashboards: self.store.dashboards(),
            current_dashboard_id: self.store.current_dashboard_id(),
        }
    }

    pub fn add_dashboard(&self, command: AddDashboardCommand) -> Result<AddDashboardResult> {
        let name = command.name.trim();
        if name.is_empty() {
            return Err(anyhow::anyhow!("Dashboard name cannot be empty"));
        }

        let dashboard = self.store.add_dashboard(name);
        self.sync.request_save();
        Ok(AddDashboardResult { dashboard })
    }

    pub fn rename_dashboard(&self, command: RenameDashboardCommand) -> Result<RenameDashboardResult> {
        let name = command.name.trim();
        if name.is_empty() {
            return Err(anyhow::anyhow!("Dashboard name cannot be empty"));
        }
        if !self.store.rename_dashboard(&command.dashboard_id, name) {
            return Err(anyhow::anyhow!("Dashboard not found: {}", command.dashboard_id));
        }

        info!("renamed dashboard {} to '{}'", command.dashboard_id, name);
        self.sync.request_save();
        Ok(RenameDashboardResult {
            success_message: format!("Dashboard renamed to '{}'", name),
        })
    }

    /// Rejected when it would leave the user with no dashboards at all.
    pub fn remove_dashboard(&self, command: RemoveDashboardCommand) -> Result<RemoveDashboardResult> {
        if self.store.dashboards().len() <= 1 {
            warn!("rejected removal of the last dashboard");
            return Err(anyhow::anyhow!("At least one dashboard must remain"));
        }
        if !self.store.remove_dashboard(&command.dashboard_id) {
            return Err(anyhow::anyhow!("Dashboard not found: {}", command.dashboard_id));
        }

        self.sync.request_save();
        Ok(RemoveDashboardResult {
            success_message: "Dashboard removed".to_string(),
        })
    }

    pub fn set_current_dashboard(&self, command: SetCurrentDashboardCommand) -> Result<()> {
        if !self.store.switch_dashboard(&command.dashboard_id) {
            return Err(anyhow::anyhow!("Dashboard not found: {}", command.dashboard_id));
        }
        self.sync.request_save();
        Ok(())
    }
}
