//! Group and item CRUD over the entity store. Validation happens here, at
//! the mutation boundary, before anything touches state; every successful
//! mutation triggers a background save.

use anyhow::Result;
use log::{debug, info, warn};

use crate::domain::commands::schedule::{
    AddGroupCommand, AddGroupResult, AddItemCommand, AddItemResult, DeleteGroupCommand,
    DeleteGroupResult, DeleteItemCommand, EditItemCommand, RenameGroupCommand, RenameGroupResult,
    ReorderItemsCommand,
};
use crate::domain::store::{EntityStore, ItemDraft};
use crate::domain::sync_service::SyncService;
use shared::CATEGORY_TRANSFER;

#[derive(Clone)]
pub struct ScheduleService {
    store: EntityStore,
    sync: SyncService,
}

impl ScheduleService {
    pub fn new(store: EntityStore, sync: SyncService) -> Self {
        Self { store, sync }
    }

    pub fn add_schedule_group(&self, command: AddGroupCommand) -> Result<AddGroupResult> {
        let title = command.title.trim();
        if title.is_empty() {
            return Err(anyhow::anyhow!("Group title cannot be empty"));
        }

        let group_id = self.store.add_group(title, command.is_pending, command.tags);
        self.sync.request_save();
        Ok(AddGroupResult { group_id })
    }

    /// `renamed: false` (and no mutation) when the group is protected or
    /// missing.
    pub fn rename_group(&self, command: RenameGroupCommand) -> Result<RenameGroupResult> {
        let title = command.new_title.trim();
        if title.is_empty() {
            return Err(anyhow::anyhow!("Group title cannot be empty"));
        }

        let renamed = self.store.rename_group(&command.group_id, title);
        if renamed {
            self.sync.request_save();
        } else {
            warn!("rename_group refused for {}", command.group_id);
        }
        Ok(RenameGroupResult { renamed })
    }

    pub fn delete_group(&self, command: DeleteGroupCommand) -> Result<DeleteGroupResult> {
        let deleted = self.store.delete_group(&command.group_id);
        if deleted {
            self.sync.request_save();
        }
        Ok(DeleteGroupResult { deleted })
    }

    /// Adding to a nonexistent group is a silent no-op (`item_id: None`),
    /// matching the behavior UI callers rely on.
    pub fn add_item_to_group(&self, command: AddItemCommand) -> Result<AddItemResult> {
        self.validate_draft(&command.item)?;

        let item_id = self
            .store
            .add_item(&command.group_id, command.item, command.custom_id);
        match &item_id {
            Some(id) => {
                info!("added item {} to group {}", id, command.group_id);
                self.sync.request_save();
            }
            None => debug!("add_item_to_group: group {} missing", command.group_id),
        }
        Ok(AddItemResult { item_id })
    }

    pub fn edit_item_in_group(&self, command: EditItemCommand) -> Result<()> {
        if let Some(title) = &command.patch.title {
            if title.trim().is_empty() {
                return Err(anyhow::anyhow!("Item title cannot be empty"));
            }
        }
        if let Some(amount) = command.patch.amount {
            if !amount.is_finite() {
                return Err(anyhow::anyhow!("Item amount must be a finite number"));
            }
        }

        // Transfer items keep their category: retargeting one side of a pair
        // would break the linked counterpart. The transfer service owns edits
        // that touch both sides.
        if let Some(existing) = self
            .store
            .find_item(&self.store.current_dashboard_id(), &command.group_id, &command.item_id)
        {
            let changes_category = matches!(
                &command.patch.category,
                Some(category) if category.as_deref() != Some(CATEGORY_TRANSFER)
            );
            if existing.is_transfer() && changes_category {
                return Err(anyhow::anyhow!(
                    "Transfer items are linked between dashboards. To change the category, delete the transfer and create a new item."
                ));
            }
        }

        if self.store.edit_item(&command.group_id, &command.item_id, command.patch) {
            self.sync.request_save();
        }
        Ok(())
    }

    pub fn delete_item_from_group(&self, command: DeleteItemCommand) -> Result<()> {
        if self.store.delete_item(&command.group_id, &command.item_id) {
            self.sync.request_save();
        }
        Ok(())
    }

    pub fn reorder_items_in_group(&self, command: ReorderItemsCommand) -> Result<()> {
        if self.store.reorder_items(&command.group_id, &command.ordered_ids) {
            self.sync.request_save();
        }
        Ok(())
    }

    fn validate_draft(&self, draft: &ItemDraft) -> Result<()> {
        if draft.title.trim().is_empty() {
            return Err(anyhow::anyhow!("Item title cannot be empty"));
        }
        if !draft.amount.is_finite() {
            return Err(anyhow::anyhow!("Item amount must be a finite number"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::ItemPatch;
    use crate::storage::cache::JsonSnapshotCache;
    use crate::storage::memory::MemoryRemoteStore;
    use chrono::NaiveDate;
    use shared::LEDGER_GROUP_TITLE;
    use std::sync::Arc;

    fn setup() -> (ScheduleService, EntityStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::new();
        let sync = SyncService::new(
            store.clone(),
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(JsonSnapshotCache::new(dir.path()).unwrap()),
        );
        (ScheduleService::new(store.clone(), sync), store, dir)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ledger_of(store: &EntityStore) -> String {
        store
            .find_group_by_title(&store.current_dashboard_id(), LEDGER_GROUP_TITLE)
            .unwrap()
    }

    #[tokio::test]
    async fn add_group_validates_title() {
        let (service, _store, _dir) = setup();
        let err = service
            .add_schedule_group(AddGroupCommand {
                title: "  ".to_string(),
                is_pending: false,
                tags: vec![],
            })
            .unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[tokio::test]
    async fn protected_group_rename_reports_failure_without_error() {
        let (service, store, _dir) = setup();
        let ledger = ledger_of(&store);

        let result = service
            .rename_group(RenameGroupCommand {
                group_id: ledger,
                new_title: "Renamed".to_string(),
            })
            .unwrap();
        assert!(!result.renamed);
    }

    #[tokio::test]
    async fn add_item_to_unknown_group_returns_none() {
        let (service, _store, _dir) = setup();
        let result = service
            .add_item_to_group(AddItemCommand {
                group_id: "ghost".to_string(),
                item: ItemDraft::simple("Rent", -800.0, date(2024, 1, 1)),
                custom_id: None,
            })
            .unwrap();
        assert!(result.item_id.is_none());
    }

    #[tokio::test]
    async fn invalid_amount_is_rejected_before_mutation() {
        let (service, store, _dir) = setup();
        let ledger = ledger_of(&store);

        let err = service
            .add_item_to_group(AddItemCommand {
                group_id: ledger.clone(),
                item: ItemDraft::simple("Weird", f64::NAN, date(2024, 1, 1)),
                custom_id: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("finite"));
        assert!(store.active_groups()[&ledger].items.is_empty());
    }

    #[tokio::test]
    async fn transfer_category_cannot_be_changed_by_plain_edit() {
        let (service, store, _dir) = setup();
        let ledger = ledger_of(&store);

        let mut draft = ItemDraft::simple("Send", -500.0, date(2024, 3, 1));
        draft.category = Some(CATEGORY_TRANSFER.to_string());
        let item_id = service
            .add_item_to_group(AddItemCommand {
                group_id: ledger.clone(),
                item: draft,
                custom_id: None,
            })
            .unwrap()
            .item_id
            .unwrap();

        let err = service
            .edit_item_in_group(EditItemCommand {
                group_id: ledger.clone(),
                item_id: item_id.clone(),
                patch: ItemPatch {
                    category: Some(Some("Groceries".to_string())),
                    ..Default::default()
                },
            })
            .unwrap_err();
        assert!(err.to_string().contains("linked between dashboards"));

        // amount edits on the same item are still fine
        service
            .edit_item_in_group(EditItemCommand {
                group_id: ledger.clone(),
                item_id: item_id.clone(),
                patch: ItemPatch {
                    amount: Some(-600.0),
                    ..Default::default()
                },
            })
            .unwrap();
        assert_eq!(store.active_groups()[&ledger].items[&item_id].amount, -600.0);
    }

    #[tokio::test]
    async fn editing_missing_item_is_a_silent_noop() {
        let (service, store, _dir) = setup();
        let ledger = ledger_of(&store);
        let before = store.active_groups();

        service
            .edit_item_in_group(EditItemCommand {
                group_id: ledger,
                item_id: "missing".to_string(),
                patch: ItemPatch::default(),
            })
            .unwrap();
        assert_eq!(store.active_groups(), before);
    }
}
