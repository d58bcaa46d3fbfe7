//! Balance aggregation over expanded occurrences: per-month income/expense
//! splits, the confirmed balance as of a date, the projected balance through
//! a viewed month, and the "adjust to what my bank says" correction flow.

use anyhow::Result;
use chrono::{Datelike, Local, NaiveDate};
use log::info;
use shared::{MonthlyTotals, ScheduleGroup};
use std::collections::HashMap;

use crate::domain::commands::balance::{AdjustBalanceCommand, AdjustBalanceResult};
use crate::domain::recurrence::{self, Occurrence};
use crate::domain::store::{EntityStore, ItemDraft};
use crate::domain::sync_service::SyncService;

const ADJUSTMENT_TITLE: &str = "Balance Adjustment";

/// Differences smaller than a tenth of a cent are treated as already equal.
const BALANCE_EPSILON: f64 = 0.001;

#[derive(Clone)]
pub struct BalanceService {
    store: EntityStore,
    sync: SyncService,
}

impl BalanceService {
    pub fn new(store: EntityStore, sync: SyncService) -> Self {
        Self { store, sync }
    }

    /// Income/expense/net for everything falling in `month`'s calendar
    /// month, recurrences included.
    pub fn monthly_totals(
        &self,
        groups: &HashMap<String, ScheduleGroup>,
        month: NaiveDate,
    ) -> MonthlyTotals {
        split_by_sign(&recurrence::expand_for_month(groups, month))
    }

    /// Confirmed balance: only occurrences dated on or before `as_of`,
    /// independent of whichever month the user is viewing.
    pub fn actual_balance(
        &self,
        groups: &HashMap<String, ScheduleGroup>,
        as_of: NaiveDate,
    ) -> MonthlyTotals {
        split_by_sign(&recurrence::expand_up_to(groups, as_of))
    }

    /// Where the balance will stand once everything scheduled through the
    /// viewed month has happened.
    pub fn projected_balance(
        &self,
        groups: &HashMap<String, ScheduleGroup>,
        month: NaiveDate,
    ) -> f64 {
        let end_of_month = recurrence::last_day_of_month(month.year(), month.month());
        split_by_sign(&recurrence::expand_up_to(groups, end_of_month)).net
    }

    /// Reconcile the tracked balance with what the user's account really
    /// holds by inserting a one-off adjustment item for the difference.
    ///
    /// Policy: only the present calendar month can be adjusted, and the
    /// target group must exist — both checked before any mutation.
    pub fn adjust_balance(&self, command: AdjustBalanceCommand) -> Result<AdjustBalanceResult> {
        let today = Local::now().date_naive();
        if (command.viewed_month.year(), command.viewed_month.month())
            != (today.year(), today.month())
        {
            return Err(anyhow::anyhow!(
                "Balance can only be adjusted for the current month"
            ));
        }

        let groups = self.store.active_groups();
        if !groups.contains_key(&command.group_id) {
            return Err(anyhow::anyhow!(
                "Adjustment target group not found: {}",
                command.group_id
            ));
        }

        let computed = self.actual_balance(&groups, today).net;
        let difference = command.actual_balance - computed;
        if difference.abs() < BALANCE_EPSILON {
            info!("balance already matches; no adjustment needed");
            return Ok(AdjustBalanceResult {
                adjustment_item_id: None,
                difference: 0.0,
            });
        }

        let draft = ItemDraft::simple(ADJUSTMENT_TITLE, difference, today);
        let adjustment_item_id = self.store.add_item(&command.group_id, draft, None);

        info!(
            "inserted balance adjustment of {:.2} into group {}",
            difference, command.group_id
        );
        self.sync.request_save();
        Ok(AdjustBalanceResult {
            adjustment_item_id,
            difference,
        })
    }
}

fn split_by_sign(occurrences: &[Occurrence]) -> MonthlyTotals {
    let mut income = 0.0;
    let mut expenses = 0.0;
    for occurrence in occurrences {
        if occurrence.item.amount > 0.0 {
            income += occurrence.item.amount;
        } else {
            expenses += occurrence.item.amount;
        }
    }
    MonthlyTotals {
        income,
        expenses,
        net: income + expenses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::cache::JsonSnapshotCache;
    use crate::storage::memory::MemoryRemoteStore;
    use chrono::Datelike;
    use shared::{RepeatRule, LEDGER_GROUP_TITLE};
    use std::sync::Arc;

    fn setup() -> (BalanceService, EntityStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::new();
        let sync = SyncService::new(
            store.clone(),
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(JsonSnapshotCache::new(dir.path()).unwrap()),
        );
        (BalanceService::new(store.clone(), sync), store, dir)
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
    async fn monthly_totals_split_by_sign() {
        let (service, store, _dir) = setup();
        let ledger = ledger_of(&store);
        store.add_item(&ledger, ItemDraft::simple("Salary", 2000.0, date(2024, 3, 1)), None);
        store.add_item(&ledger, ItemDraft::simple("Rent", -800.0, date(2024, 3, 5)), None);
        store.add_item(&ledger, ItemDraft::simple("Groceries", -150.0, date(2024, 3, 12)), None);

        let totals = service.monthly_totals(&store.active_groups(), date(2024, 3, 1));
        assert_eq!(totals.income, 2000.0);
        assert_eq!(totals.expenses, -950.0);
        assert_eq!(totals.net, 1050.0);
    }

    #[tokio::test]
    async fn actual_balance_ignores_future_items() {
        let (service, store, _dir) = setup();
        let ledger = ledger_of(&store);
        store.add_item(&ledger, ItemDraft::simple("Salary", 2000.0, date(2024, 3, 1)), None);
        store.add_item(&ledger, ItemDraft::simple("Future Rent", -800.0, date(2024, 4, 1)), None);

        let totals = service.actual_balance(&store.active_groups(), date(2024, 3, 15));
        assert_eq!(totals.net, 2000.0);
    }

    #[tokio::test]
    async fn projected_balance_includes_recurrences_through_month_end() {
        let (service, store, _dir) = setup();
        let ledger = ledger_of(&store);
        let mut draft = ItemDraft::simple("Salary", 1000.0, date(2024, 1, 15));
        draft.repeat = Some(RepeatRule::Monthly);
        store.add_item(&ledger, draft, None);

        // Jan through Apr inclusive: four occurrences.
        let projected = service.projected_balance(&store.active_groups(), date(2024, 4, 2));
        assert_eq!(projected, 4000.0);
    }

    #[tokio::test]
    async fn projected_balance_counts_weekly_templates_per_week() {
        let (service, store, _dir) = setup();
        let ledger = ledger_of(&store);
        let mut draft = ItemDraft::simple("Allowance", 25.0, date(2024, 3, 4));
        draft.repeat = Some(RepeatRule::Weekly);
        store.add_item(&ledger, draft, None);

        // 2024-03-04 .. 2024-03-31 holds the anchor plus three repeats.
        let projected = service.projected_balance(&store.active_groups(), date(2024, 3, 10));
        assert_eq!(projected, 100.0);
    }

    #[tokio::test]
    async fn adjust_balance_inserts_the_difference() {
        let (service, store, _dir) = setup();
        let today = Local::now().date_naive();
        let ledger = ledger_of(&store);
        store.add_item(&ledger, ItemDraft::simple("Salary", 2000.0, today), None);

        let result = service
            .adjust_balance(AdjustBalanceCommand {
                group_id: ledger.clone(),
                actual_balance: 1850.0,
                viewed_month: today,
            })
            .unwrap();

        assert_eq!(result.difference, -150.0);
        let item_id = result.adjustment_item_id.unwrap();
        let item = store.active_groups()[&ledger].items[&item_id].clone();
        assert_eq!(item.title, ADJUSTMENT_TITLE);
        assert_eq!(item.amount, -150.0);
        assert_eq!(item.date, today);

        // the books now reconcile
        let totals = service.actual_balance(&store.active_groups(), today);
        assert!((totals.net - 1850.0).abs() < BALANCE_EPSILON);
    }

    #[tokio::test]
    async fn adjust_balance_is_a_noop_when_amounts_match() {
        let (service, store, _dir) = setup();
        let today = Local::now().date_naive();
        let ledger = ledger_of(&store);
        store.add_item(&ledger, ItemDraft::simple("Salary", 500.0, today), None);

        let result = service
            .adjust_balance(AdjustBalanceCommand {
                group_id: ledger.clone(),
                actual_balance: 500.0,
                viewed_month: today,
            })
            .unwrap();
        assert!(result.adjustment_item_id.is_none());
        assert_eq!(store.active_groups()[&ledger].items.len(), 1);
    }

    #[tokio::test]
    async fn adjust_balance_rejects_other_months() {
        let (service, store, _dir) = setup();
        let ledger = ledger_of(&store);
        let today = Local::now().date_naive();
        let other_month = if today.month() == 1 {
            date(today.year() - 1, 12, 15)
        } else {
            date(today.year(), today.month() - 1, 15)
        };

        let err = service
            .adjust_balance(AdjustBalanceCommand {
                group_id: ledger,
                actual_balance: 100.0,
                viewed_month: other_month,
            })
            .unwrap_err();
        assert!(err.to_string().contains("current month"));
    }

    #[tokio::test]
    async fn adjust_balance_rejects_unknown_group() {
        let (service, _store, _dir) = setup();
        let today = Local::now().date_naive();

        let err = service
            .adjust_balance(AdjustBalanceCommand {
                group_id: "ghost".to_string(),
                actual_balance: 100.0,
                viewed_month: today,
            })
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
