//! # Entity Store
//!
//! The in-memory normalized state for dashboards, schedule groups, and
//! items, and the single mutation boundary for all of them. Invariants that
//! the rest of the system relies on are enforced here, not in UI code:
//! protected groups cannot be renamed or deleted, the dashboard collection
//! is never empty, and paired (transfer) mutations apply to both sides or
//! not at all.
//!
//! Mutations are synchronous under one lock — there is a single logical
//! writer per device; concurrency only exists across devices and is
//! arbitrated by the sync engine's merge rule.

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use shared::{
    Dashboard, DashboardData, RepeatRule, ScheduleGroup, ScheduleItem, TransferDirection,
    UserDocument, DOCUMENT_VERSION, LEDGER_GROUP_TITLE, PENDING_GROUP_TITLE, SCHEDULE_GROUP_TITLE,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const DEFAULT_DASHBOARD_NAME: &str = "Personal";

/// The fields callers supply when creating an item; the store assigns id,
/// `created_at`, `order_index`, and `archived` itself.
#[derive(Debug, Clone)]
pub struct ItemDraft {
    pub title: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub repeat: Option<RepeatRule>,
    pub repeat_end_date: Option<NaiveDate>,
    pub is_pending: bool,
    pub transfer_direction: Option<TransferDirection>,
    pub transfer_to: Option<String>,
    pub transfer_from: Option<String>,
    pub linked_transaction_id: Option<String>,
}

impl ItemDraft {
    /// A plain (non-transfer, non-recurring) draft.
    pub fn simple(title: impl Into<String>, amount: f64, date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            amount,
            date,
            category: None,
            icon: None,
            repeat: None,
            repeat_end_date: None,
            is_pending: false,
            transfer_direction: None,
            transfer_to: None,
            transfer_from: None,
            linked_transaction_id: None,
        }
    }

    fn materialize(self, id: String, order_index: u32) -> ScheduleItem {
        ScheduleItem {
            id,
            title: self.title,
            amount: self.amount,
            date: self.date,
            category: self.category,
            icon: self.icon,
            repeat: self.repeat,
            repeat_end_date: self.repeat_end_date,
            is_pending: self.is_pending,
            created_at: Utc::now(),
            order_index,
            archived: false,
            transfer_direction: self.transfer_direction,
            transfer_to: self.transfer_to,
            transfer_from: self.transfer_from,
            linked_transaction_id: self.linked_transaction_id,
        }
    }
}

/// Shallow patch applied to an existing item. `None` leaves a field alone;
/// the doubled options distinguish "leave" from "clear".
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub amount: Option<f64>,
    pub date: Option<NaiveDate>,
    pub category: Option<Option<String>>,
    pub icon: Option<Option<String>>,
    pub repeat: Option<Option<RepeatRule>>,
    pub repeat_end_date: Option<Option<NaiveDate>>,
    pub is_pending: Option<bool>,
    pub archived: Option<bool>,
}

impl ItemPatch {
    fn apply(self, item: &mut ScheduleItem) {
        if let Some(title) = self.title {
            item.title = title;
        }
        if let Some(amount) = self.amount {
            item.amount = amount;
        }
        if let Some(date) = self.date {
            item.date = date;
        }
        if let Some(category) = self.category {
            item.category = category;
        }
        if let Some(icon) = self.icon {
            item.icon = icon;
        }
        if let Some(repeat) = self.repeat {
            item.repeat = repeat;
        }
        if let Some(repeat_end_date) = self.repeat_end_date {
            item.repeat_end_date = repeat_end_date;
        }
        if let Some(is_pending) = self.is_pending {
            item.is_pending = is_pending;
        }
        if let Some(archived) = self.archived {
            item.archived = archived;
        }
    }
}

/// Addresses one item across the dashboard tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLocation {
    pub dashboard_id: String,
    pub group_id: String,
    pub item_id: String,
}

/// One half of a paired insert.
#[derive(Debug, Clone)]
pub struct PairInsert {
    pub dashboard_id: String,
    pub group_id: String,
    pub item_id: String,
    pub draft: ItemDraft,
}

struct State {
    dashboards: Vec<Dashboard>,
    current_dashboard_id: String,
    dashboard_data: HashMap<String, DashboardData>,
}

/// Cloneable handle to the shared in-memory state.
#[derive(Clone)]
pub struct EntityStore {
    state: Arc<RwLock<State>>,
}

impl EntityStore {
    /// A store seeded with one default dashboard, so the non-empty invariant
    /// holds from the first instant. `load` replaces this wholesale when a
    /// persisted document exists.
    pub fn new() -> Self {
        let dashboard = Dashboard::new(DEFAULT_DASHBOARD_NAME);
        let mut dashboard_data = HashMap::new();
        dashboard_data.insert(
            dashboard.id.clone(),
            DashboardData {
                schedule_groups: Self::seed_groups(),
                last_modified: Utc::now(),
                shared_with: Vec::new(),
            },
        );
        Self {
            state: Arc::new(RwLock::new(State {
                current_dashboard_id: dashboard.id.clone(),
                dashboards: vec![dashboard],
                dashboard_data,
            })),
        }
    }

    /// Every dashboard starts with a monthly schedule, a protected running
    /// ledger, and a pending drafts group.
    fn seed_groups() -> HashMap<String, ScheduleGroup> {
        let mut groups = HashMap::new();
        let schedule = ScheduleGroup::new(SCHEDULE_GROUP_TITLE, false, Vec::new(), 0);
        let mut ledger = ScheduleGroup::new(LEDGER_GROUP_TITLE, false, Vec::new(), 1);
        ledger.protected = true;
        let pending = ScheduleGroup::new(PENDING_GROUP_TITLE, true, Vec::new(), 2);
        groups.insert(schedule.id.clone(), schedule);
        groups.insert(ledger.id.clone(), ledger);
        groups.insert(pending.id.clone(), pending);
        groups
    }

    // ---- dashboards -----------------------------------------------------

    pub fn dashboards(&self) -> Vec<Dashboard> {
        self.state.read().unwrap().dashboards.clone()
    }

    pub fn current_dashboard_id(&self) -> String {
        self.state.read().unwrap().current_dashboard_id.clone()
    }

    pub fn dashboard_name(&self, dashboard_id: &str) -> Option<String> {
        let state = self.state.read().unwrap();
        state
            .dashboards
            .iter()
            .find(|d| d.id == dashboard_id)
            .map(|d| d.name.clone())
    }

    pub fn add_dashboard(&self, name: &str) -> Dashboard {
        let dashboard = Dashboard::new(name);
        let mut state = self.state.write().unwrap();
        state.dashboard_data.insert(
            dashboard.id.clone(),
            DashboardData {
                schedule_groups: Self::seed_groups(),
                last_modified: Utc::now(),
                shared_with: Vec::new(),
            },
        );
        state.dashboards.push(dashboard.clone());
        info!("added dashboard '{}' ({})", dashboard.name, dashboard.id);
        dashboard
    }

    pub fn rename_dashboard(&self, dashboard_id: &str, name: &str) -> bool {
        let mut state = self.state.write().unwrap();
        match state.dashboards.iter_mut().find(|d| d.id == dashboard_id) {
            Some(dashboard) => {
                dashboard.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Fails when the dashboard is unknown or it is the sole remaining one:
    /// the dashboard collection is never allowed to become empty.
    pub fn remove_dashboard(&self, dashboard_id: &str) -> bool {
        let mut state = self.state.write().unwrap();
        if state.dashboards.len() <= 1 {
            warn!("refusing to remove the last dashboard");
            return false;
        }
        let Some(position) = state.dashboards.iter().position(|d| d.id == dashboard_id) else {
            return false;
        };
        state.dashboards.remove(position);
        state.dashboard_data.remove(dashboard_id);
        if state.current_dashboard_id == dashboard_id {
            state.current_dashboard_id = state.dashboards[0].id.clone();
        }
        info!("removed dashboard {}", dashboard_id);
        true
    }

    /// Sets the active dashboard. The working group view is derived on read
    /// ([`EntityStore::active_groups`]), defaulting to an empty map when the
    /// dashboard has no data bag yet.
    pub fn switch_dashboard(&self, dashboard_id: &str) -> bool {
        let mut state = self.state.write().unwrap();
        if !state.dashboards.iter().any(|d| d.id == dashboard_id) {
            warn!("cannot switch to unknown dashboard {}", dashboard_id);
            return false;
        }
        state.current_dashboard_id = dashboard_id.to_string();
        true
    }

    /// Snapshot of the active dashboard's group map.
    pub fn active_groups(&self) -> HashMap<String, ScheduleGroup> {
        let state = self.state.read().unwrap();
        state
            .dashboard_data
            .get(&state.current_dashboard_id)
            .map(|data| data.schedule_groups.clone())
            .unwrap_or_default()
    }

    pub fn groups_of(&self, dashboard_id: &str) -> HashMap<String, ScheduleGroup> {
        let state = self.state.read().unwrap();
        state
            .dashboard_data
            .get(dashboard_id)
            .map(|data| data.schedule_groups.clone())
            .unwrap_or_default()
    }

    // ---- groups ---------------------------------------------------------

    pub fn add_group(&self, title: &str, is_pending: bool, tags: Vec<String>) -> String {
        let mut state = self.state.write().unwrap();
        let dashboard_id = state.current_dashboard_id.clone();
        let data = state.dashboard_data.entry(dashboard_id).or_default();
        let group = ScheduleGroup::new(title, is_pending, tags, data.schedule_groups.len() as u32);
        let group_id = group.id.clone();
        data.schedule_groups.insert(group_id.clone(), group);
        data.last_modified = Utc::now();
        info!("added group '{}' ({})", title, group_id);
        group_id
    }

    /// Returns `false` and leaves the map untouched when the group is
    /// protected or missing.
    pub fn rename_group(&self, group_id: &str, new_title: &str) -> bool {
        let mut state = self.state.write().unwrap();
        let dashboard_id = state.current_dashboard_id.clone();
        let Some(data) = state.dashboard_data.get_mut(&dashboard_id) else {
            return false;
        };
        match data.schedule_groups.get_mut(group_id) {
            Some(group) if group.protected => {
                warn!("refusing to rename protected group '{}'", group.title);
                false
            }
            Some(group) => {
                group.title = new_title.to_string();
                data.last_modified = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn delete_group(&self, group_id: &str) -> bool {
        let mut state = self.state.write().unwrap();
        let dashboard_id = state.current_dashboard_id.clone();
        let Some(data) = state.dashboard_data.get_mut(&dashboard_id) else {
            return false;
        };
        match data.schedule_groups.get(group_id) {
            Some(group) if group.protected => {
                warn!("refusing to delete protected group '{}'", group.title);
                false
            }
            Some(_) => {
                data.schedule_groups.remove(group_id);
                data.last_modified = Utc::now();
                info!("deleted group {}", group_id);
                true
            }
            None => false,
        }
    }

    // ---- items ----------------------------------------------------------

    /// Insert into a group on the active dashboard. Returns the item id, or
    /// `None` (no mutation) when the group does not exist — a silent no-op
    /// by design, matching the edit/delete calls below.
    pub fn add_item(&self, group_id: &str, draft: ItemDraft, custom_id: Option<String>) -> Option<String> {
        let dashboard_id = self.current_dashboard_id();
        self.add_item_in(&dashboard_id, group_id, draft, custom_id)
    }

    pub fn add_item_in(
        &self,
        dashboard_id: &str,
        group_id: &str,
        draft: ItemDraft,
        custom_id: Option<String>,
    ) -> Option<String> {
        let mut state = self.state.write().unwrap();
        let Some(data) = state.dashboard_data.get_mut(dashboard_id) else {
            debug!("add_item: no data for dashboard {}", dashboard_id);
            return None;
        };
        let Some(group) = data.schedule_groups.get_mut(group_id) else {
            debug!("add_item: group {} not found", group_id);
            return None;
        };
        let id = custom_id.unwrap_or_else(|| {
            ScheduleItem::generate_id(draft.amount, Utc::now().timestamp_millis() as u64)
        });
        let item = draft.materialize(id.clone(), group.items.len() as u32);
        group.items.insert(id.clone(), item);
        data.last_modified = Utc::now();
        Some(id)
    }

    /// Shallow-merge a patch into an item. Returns whether anything changed;
    /// editing a nonexistent item is a silent no-op.
    pub fn edit_item(&self, group_id: &str, item_id: &str, patch: ItemPatch) -> bool {
        let dashboard_id = self.current_dashboard_id();
        self.edit_item_in(&dashboard_id, group_id, item_id, patch)
    }

    pub fn edit_item_in(
        &self,
        dashboard_id: &str,
        group_id: &str,
        item_id: &str,
        patch: ItemPatch,
    ) -> bool {
        let mut state = self.state.write().unwrap();
        let Some(data) = state.dashboard_data.get_mut(dashboard_id) else {
            return false;
        };
        let Some(item) = data
            .schedule_groups
            .get_mut(group_id)
            .and_then(|group| group.items.get_mut(item_id))
        else {
            debug!("edit_item: {}/{} not found", group_id, item_id);
            return false;
        };
        patch.apply(item);
        data.last_modified = Utc::now();
        true
    }

    pub fn delete_item(&self, group_id: &str, item_id: &str) -> bool {
        let dashboard_id = self.current_dashboard_id();
        let mut state = self.state.write().unwrap();
        let Some(data) = state.dashboard_data.get_mut(&dashboard_id) else {
            return false;
        };
        let Some(group) = data.schedule_groups.get_mut(group_id) else {
            return false;
        };
        let removed = group.items.remove(item_id).is_some();
        if removed {
            data.last_modified = Utc::now();
        } else {
            debug!("delete_item: {}/{} not found", group_id, item_id);
        }
        removed
    }

    /// Reassign `order_index` by position. Ids not present in the group are
    /// ignored.
    pub fn reorder_items(&self, group_id: &str, ordered_ids: &[String]) -> bool {
        let dashboard_id = self.current_dashboard_id();
        let mut state = self.state.write().unwrap();
        let Some(group) = state
            .dashboard_data
            .get_mut(&dashboard_id)
            .and_then(|data| data.schedule_groups.get_mut(group_id))
        else {
            return false;
        };
        let mut position = 0u32;
        for id in ordered_ids {
            if let Some(item) = group.items.get_mut(id) {
                item.order_index = position;
                position += 1;
            }
        }
        true
    }

    // ---- lookups used by the transfer coordinator -----------------------

    pub fn find_item(&self, dashboard_id: &str, group_id: &str, item_id: &str) -> Option<ScheduleItem> {
        let state = self.state.read().unwrap();
        state
            .dashboard_data
            .get(dashboard_id)?
            .schedule_groups
            .get(group_id)?
            .items
            .get(item_id)
            .cloned()
    }

    /// Search every group of a dashboard for an item id. Returns the owning
    /// group id alongside the item.
    pub fn find_item_in_dashboard(
        &self,
        dashboard_id: &str,
        item_id: &str,
    ) -> Option<(String, ScheduleItem)> {
        let state = self.state.read().unwrap();
        let data = state.dashboard_data.get(dashboard_id)?;
        for (group_id, group) in &data.schedule_groups {
            if let Some(item) = group.items.get(item_id) {
                return Some((group_id.clone(), item.clone()));
            }
        }
        None
    }

    pub fn find_group_by_title(&self, dashboard_id: &str, title: &str) -> Option<String> {
        let state = self.state.read().unwrap();
        state
            .dashboard_data
            .get(dashboard_id)?
            .schedule_groups
            .values()
            .find(|group| group.title == title)
            .map(|group| group.id.clone())
    }

    // ---- paired mutations (transfer invariant) --------------------------

    /// Insert two linked items, each into its own dashboard/group, in one
    /// locked operation: both groups are validated before either item is
    /// written, so a failure cannot leave a half-written transfer.
    pub fn insert_pair(&self, first: PairInsert, second: PairInsert) -> Result<()> {
        let mut state = self.state.write().unwrap();

        for insert in [&first, &second] {
            let exists = state
                .dashboard_data
                .get(&insert.dashboard_id)
                .map_or(false, |data| data.schedule_groups.contains_key(&insert.group_id));
            if !exists {
                bail!(
                    "group {} not found in dashboard {}",
                    insert.group_id,
                    insert.dashboard_id
                );
            }
        }

        for insert in [first, second] {
            let data = state
                .dashboard_data
                .get_mut(&insert.dashboard_id)
                .expect("validated above");
            let group = data
                .schedule_groups
                .get_mut(&insert.group_id)
                .expect("validated above");
            let item = insert
                .draft
                .materialize(insert.item_id.clone(), group.items.len() as u32);
            group.items.insert(insert.item_id, item);
            data.last_modified = Utc::now();
        }
        Ok(())
    }

    /// Patch two linked items atomically; fails without mutating when either
    /// side is missing.
    pub fn update_pair(
        &self,
        first: &ItemLocation,
        first_patch: ItemPatch,
        second: &ItemLocation,
        second_patch: ItemPatch,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();

        for location in [first, second] {
            let exists = state
                .dashboard_data
                .get(&location.dashboard_id)
                .and_then(|data| data.schedule_groups.get(&location.group_id))
                .map_or(false, |group| group.items.contains_key(&location.item_id));
            if !exists {
                bail!("linked item {} not found; aborting paired update", location.item_id);
            }
        }

        for (location, patch) in [(first, first_patch), (second, second_patch)] {
            let data = state
                .dashboard_data
                .get_mut(&location.dashboard_id)
                .expect("validated above");
            let item = data
                .schedule_groups
                .get_mut(&location.group_id)
                .and_then(|group| group.items.get_mut(&location.item_id))
                .expect("validated above");
            patch.apply(item);
            data.last_modified = Utc::now();
        }
        Ok(())
    }

    /// Remove two linked items atomically; fails without mutating when
    /// either side is missing.
    pub fn remove_pair(&self, first: &ItemLocation, second: &ItemLocation) -> Result<()> {
        let mut state = self.state.write().unwrap();

        for location in [first, second] {
            let exists = state
                .dashboard_data
                .get(&location.dashboard_id)
                .and_then(|data| data.schedule_groups.get(&location.group_id))
                .map_or(false, |group| group.items.contains_key(&location.item_id));
            if !exists {
                bail!("linked item {} not found; aborting paired delete", location.item_id);
            }
        }

        for location in [first, second] {
            let data = state
                .dashboard_data
                .get_mut(&location.dashboard_id)
                .expect("validated above");
            data.schedule_groups
                .get_mut(&location.group_id)
                .expect("validated above")
                .items
                .remove(&location.item_id);
            data.last_modified = Utc::now();
        }
        Ok(())
    }

    // ---- sync integration -----------------------------------------------

    /// Build the whole-document snapshot the sync engine persists.
    pub fn snapshot_document(&self) -> UserDocument {
        let state = self.state.read().unwrap();
        UserDocument {
            dashboards: state.dashboards.clone(),
            current_dashboard_id: state.current_dashboard_id.clone(),
            dashboard_data: state.dashboard_data.clone(),
            version: DOCUMENT_VERSION,
            last_updated: Utc::now(),
        }
    }

    /// Replace all in-memory state with a persisted document (remote load,
    /// remote push, or cache restore). Last push wins on the read path.
    pub fn replace_from_document(&self, document: UserDocument) {
        let mut state = self.state.write().unwrap();
        if document.dashboards.is_empty() {
            warn!("refusing to apply document with no dashboards");
            return;
        }
        let current = if document
            .dashboards
            .iter()
            .any(|d| d.id == document.current_dashboard_id)
        {
            document.current_dashboard_id
        } else {
            document.dashboards[0].id.clone()
        };
        state.dashboards = document.dashboards;
        state.current_dashboard_id = current;
        state.dashboard_data = document.dashboard_data;
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
