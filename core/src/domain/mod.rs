//! # Domain Module
//!
//! The finance tracker's business logic: the entity store (the single
//! mutation boundary), recurrence expansion, balance projection, transfer
//! coordination, and the sync engine. UI shells call into these services
//! and render what comes back; no domain rule lives outside this module.

pub mod balance_service;
pub mod commands;
pub mod dashboard_service;
pub mod recurrence;
pub mod schedule_service;
pub mod store;
pub mod sync_service;
pub mod transfer_service;

pub use balance_service::BalanceService;
pub use dashboard_service::DashboardService;
pub use recurrence::{expand_for_month, expand_up_to, Occurrence};
pub use schedule_service::ScheduleService;
pub use store::{EntityStore, ItemDraft, ItemLocation, ItemPatch};
pub use sync_service::SyncService;
pub use transfer_service::TransferService;
