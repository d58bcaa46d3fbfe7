//! Cross-dashboard transfer coordination. A transfer is two linked items in
//! two dashboards: an outgoing (negative) half and an incoming (positive)
//! half, each carrying the other's id in `linked_transaction_id`. Create,
//! edit, and delete all go through the store's paired primitives so both
//! sides change together or not at all — the system's one cross-aggregate
//! consistency requirement.

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use log::{info, warn};
use shared::{ScheduleItem, TransferDirection, CATEGORY_TRANSFER, LEDGER_GROUP_TITLE};

use crate::domain::commands::transfer::{
    AddTransferCommand, AddTransferResult, DeleteTransferCommand, DeleteTransferResult,
    EditTransferCommand, EditTransferResult,
};
use crate::domain::store::{EntityStore, ItemDraft, ItemLocation, ItemPatch, PairInsert};
use crate::domain::sync_service::SyncService;

#[derive(Clone)]
pub struct TransferService {
    store: EntityStore,
    sync: SyncService,
}

impl TransferService {
    pub fn new(store: EntityStore, sync: SyncService) -> Self {
        Self { store, sync }
    }

    /// Create both halves of a transfer. The incoming half lands in the
    /// target dashboard's running ledger (unless a group is named
    /// explicitly) with an auto-generated "Received from …" title. Both
    /// dashboards are updated in one logical operation and persisted by a
    /// single save.
    pub fn add_transfer_transaction(&self, command: AddTransferCommand) -> Result<AddTransferResult> {
        if command.title.trim().is_empty() {
            return Err(anyhow!("Transfer title cannot be empty"));
        }
        let magnitude = command.amount.abs();
        if !magnitude.is_finite() || magnitude == 0.0 {
            return Err(anyhow!("Transfer amount must be a non-zero number"));
        }
        if command.from_dashboard_id == command.to_dashboard_id {
            return Err(anyhow!("Transfers must go to a different dashboard"));
        }

        let from_name = self
            .store
            .dashboard_name(&command.from_dashboard_id)
            .ok_or_else(|| anyhow!("Dashboard not found: {}", command.from_dashboard_id))?;
        if self.store.dashboard_name(&command.to_dashboard_id).is_none() {
            return Err(anyhow!("Dashboard not found: {}", command.to_dashboard_id));
        }

        let to_group_id = match &command.to_group_id {
            Some(group_id) => group_id.clone(),
            None => self
                .store
                .find_group_by_title(&command.to_dashboard_id, LEDGER_GROUP_TITLE)
                .ok_or_else(|| {
                    anyhow!(
                        "Target dashboard has no '{}' group to receive the transfer",
                        LEDGER_GROUP_TITLE
                    )
                })?,
        };

        let now_ms = Utc::now().timestamp_millis() as u64;
        let outgoing_id = ScheduleItem::generate_id(-magnitude, now_ms);
        let incoming_id = ScheduleItem::generate_id(magnitude, now_ms);

        let mut outgoing = ItemDraft::simple(command.title.trim(), -magnitude, command.date);
        outgoing.category = Some(CATEGORY_TRANSFER.to_string());
        outgoing.icon = command.icon.clone();
        outgoing.transfer_direction = Some(TransferDirection::Outgoing);
        outgoing.transfer_to = Some(command.to_dashboard_id.clone());
        outgoing.linked_transaction_id = Some(incoming_id.clone());

        let mut incoming = ItemDraft::simple(format!("Received from {}", from_name), magnitude, command.date);
        incoming.category = Some(CATEGORY_TRANSFER.to_string());
        incoming.icon = command.icon.clone();
        incoming.transfer_direction = Some(TransferDirection::Incoming);
        incoming.transfer_from = Some(command.from_dashboard_id.clone());
        incoming.linked_transaction_id = Some(outgoing_id.clone());

        self.store.insert_pair(
            PairInsert {
                dashboard_id: command.from_dashboard_id.clone(),
                group_id: command.from_group_id.clone(),
                item_id: outgoing_id.clone(),
                draft: outgoing,
            },
            PairInsert {
                dashboard_id: command.to_dashboard_id.clone(),
                group_id: to_group_id,
                item_id: incoming_id.clone(),
                draft: incoming,
            },
        )?;

        info!(
            "created transfer {} -> {} for {:.2}",
            command.from_dashboard_id, command.to_dashboard_id, magnitude
        );
        self.sync.request_save();
        Ok(AddTransferResult {
            outgoing_id,
            incoming_id,
        })
    }

    /// Edit one half of a transfer and propagate to its counterpart:
    /// amounts are recomputed for both sides from the new magnitude, shared
    /// fields (date, icon) follow, and the category is immutable.
    pub fn edit_transfer_transaction(&self, command: EditTransferCommand) -> Result<EditTransferResult> {
        if let Some(category) = &command.category {
            if category != CATEGORY_TRANSFER {
                return Err(anyhow!(
                    "Transfer items are linked between dashboards. To change the category, delete the transfer and create a new item."
                ));
            }
        }
        if let Some(title) = &command.title {
            if title.trim().is_empty() {
                return Err(anyhow!("Transfer title cannot be empty"));
            }
        }
        if let Some(amount) = command.amount {
            if !amount.is_finite() || amount == 0.0 {
                return Err(anyhow!("Transfer amount must be a non-zero number"));
            }
        }

        let (item, counterpart_location, _counterpart) = self.locate_pair(
            &command.dashboard_id,
            &command.group_id,
            &command.item_id,
        )?;

        let direction = item
            .transfer_direction
            .ok_or_else(|| anyhow!("Transfer item {} has no direction", item.id))?;
        let magnitude = command.amount.map(f64::abs);
        let (own_amount, counterpart_amount) = match direction {
            TransferDirection::Outgoing => (magnitude.map(|m| -m), magnitude),
            TransferDirection::Incoming => (magnitude, magnitude.map(|m| -m)),
        };

        let own_patch = ItemPatch {
            title: command.title.clone(),
            amount: own_amount,
            date: command.date,
            icon: command.icon.clone(),
            ..Default::default()
        };
        // the counterpart keeps its own title; only shared fields follow
        let counterpart_patch = ItemPatch {
            amount: counterpart_amount,
            date: command.date,
            icon: command.icon.clone(),
            ..Default::default()
        };

        let own_location = ItemLocation {
            dashboard_id: command.dashboard_id.clone(),
            group_id: command.group_id.clone(),
            item_id: command.item_id.clone(),
        };
        self.store
            .update_pair(&own_location, own_patch, &counterpart_location, counterpart_patch)?;

        self.sync.request_save();
        Ok(EditTransferResult {
            success_message: "Transfer updated on both dashboards".to_string(),
        })
    }

    /// Remove both halves as one unit. If the counterpart cannot be found
    /// the whole delete is abandoned — an orphaned half would be worse than
    /// a stale pair.
    pub fn delete_transfer_transaction(&self, command: DeleteTransferCommand) -> Result<DeleteTransferResult> {
        let (item, counterpart_location, counterpart) = self.locate_pair(
            &command.dashboard_id,
            &command.group_id,
            &command.item_id,
        )?;

        let own_location = ItemLocation {
            dashboard_id: command.dashboard_id.clone(),
            group_id: command.group_id.clone(),
            item_id: command.item_id.clone(),
        };
        self.store.remove_pair(&own_location, &counterpart_location)?;

        info!("deleted transfer pair {} / {}", item.id, counterpart.id);
        self.sync.request_save();

        let (removed_outgoing_id, removed_incoming_id) = match item.transfer_direction {
            Some(TransferDirection::Outgoing) => (item.id, counterpart.id),
            _ => (counterpart.id, item.id),
        };
        Ok(DeleteTransferResult {
            removed_outgoing_id,
            removed_incoming_id,
        })
    }

    /// Resolve an item and its linked counterpart, failing (with no
    /// mutation anywhere) when either end is missing or not a transfer.
    fn locate_pair(
        &self,
        dashboard_id: &str,
        group_id: &str,
        item_id: &str,
    ) -> Result<(ScheduleItem, ItemLocation, ScheduleItem)> {
        let item = self
            .store
            .find_item(dashboard_id, group_id, item_id)
            .ok_or_else(|| anyhow!("Transfer item not found: {}", item_id))?;
        if !item.is_transfer() {
            bail!("Item {} is not a transfer", item_id);
        }

        let counterpart_dashboard = match item.transfer_direction {
            Some(TransferDirection::Outgoing) => item.transfer_to.clone(),
            Some(TransferDirection::Incoming) => item.transfer_from.clone(),
            None => None,
        }
        .ok_or_else(|| anyhow!("Transfer item {} has no counterpart dashboard", item_id))?;

        let linked_id = item
            .linked_transaction_id
            .clone()
            .ok_or_else(|| anyhow!("Transfer item {} has no linked transaction", item_id))?;

        let Some((counterpart_group, counterpart)) = self
            .store
            .find_item_in_dashboard(&counterpart_dashboard, &linked_id)
        else {
            warn!(
                "counterpart {} missing from dashboard {}; aborting",
                linked_id, counterpart_dashboard
            );
            bail!("Linked transfer item could not be found; the operation was abandoned");
        };

        let counterpart_location = ItemLocation {
            dashboard_id: counterpart_dashboard,
            group_id: counterpart_group,
            item_id: linked_id,
        };
        Ok((item, counterpart_location, counterpart))
    }
}
