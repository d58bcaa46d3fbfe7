//! Shared data model for the finboard finance tracker.
//!
//! Everything in here is serialized with camelCase field names because the
//! remote store still holds documents written by the original web client;
//! the Rust core must read and write the exact same shape. Timestamps are
//! epoch milliseconds for the same reason (`Date.now()` heritage).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current schema version of the persisted user document.
///
/// v1 stored `scheduleGroups` as an array of groups with item arrays,
/// v2 moved to id-keyed maps but knew only a single implicit dashboard,
/// v3 is the multi-dashboard layout below. `core`'s migration module
/// upgrades older documents once at load time.
pub const DOCUMENT_VERSION: u32 = 3;

/// Category string that marks an item as one half of a transfer pair.
pub const CATEGORY_TRANSFER: &str = "Transfer";

/// Title of the protected running-ledger group every dashboard is seeded
/// with. Transfers are routed into the target dashboard's group with this
/// title, so renaming it would orphan the routing convention — which is why
/// the group is protected in the first place.
pub const LEDGER_GROUP_TITLE: &str = "Daily Transactions";

/// Title of the seeded monthly schedule group.
pub const SCHEDULE_GROUP_TITLE: &str = "Monthly Schedule";

/// Title of the seeded pending (draft) group.
pub const PENDING_GROUP_TITLE: &str = "Pending Items";

/// A named budget/workspace. Groups and items live in the per-dashboard
/// [`DashboardData`] bag, keyed by this id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub id: String,
    pub name: String,
}

impl Dashboard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }
}

/// Per-dashboard state bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    #[serde(default)]
    pub schedule_groups: HashMap<String, ScheduleGroup>,
    #[serde(default = "Utc::now", with = "chrono::serde::ts_milliseconds")]
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub shared_with: Vec<String>,
}

impl Default for DashboardData {
    fn default() -> Self {
        Self {
            schedule_groups: HashMap::new(),
            last_modified: Utc::now(),
            shared_with: Vec::new(),
        }
    }
}

/// A named collection of items. `is_pending` groups hold drafts: their items
/// are excluded from recurrence expansion and balance math. `protected`
/// groups cannot be renamed or deleted through the mutation interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleGroup {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub is_pending: bool,
    #[serde(default)]
    pub items: HashMap<String, ScheduleItem>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default = "Utc::now", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub order_index: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub protected: bool,
}

impl ScheduleGroup {
    pub fn new(title: impl Into<String>, is_pending: bool, tags: Vec<String>, order_index: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            is_pending,
            items: HashMap::new(),
            tags,
            archived: false,
            created_at: Utc::now(),
            order_index,
            protected: false,
        }
    }
}

/// A single transaction, or a recurring template when `repeat` is set.
///
/// `amount` sign encodes direction: positive is income, negative is expense.
/// For templates the stored `date` is the first occurrence; `repeat_end_date`
/// bounds the last one. The four `transfer_*` fields are only present on
/// items with `category == "Transfer"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    pub id: String,
    pub title: String,
    pub amount: f64,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_repeat",
        skip_serializing_if = "Option::is_none"
    )]
    pub repeat: Option<RepeatRule>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub repeat_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_pending: bool,
    #[serde(default = "Utc::now", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub order_index: u32,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_direction: Option<TransferDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_transaction_id: Option<String>,
}

impl ScheduleItem {
    /// Generate a unique item ID from the amount sign and a timestamp.
    /// Format: `<in|ex>-<timestamp_ms>-<random_suffix>`, e.g. `in-1625846400123-af3c`.
    pub fn generate_id(amount: f64, timestamp_ms: u64) -> String {
        let kind = if amount >= 0.0 { "in" } else { "ex" };
        format!("{}-{}-{}", kind, timestamp_ms, Self::generate_random_suffix(4))
    }

    pub fn is_transfer(&self) -> bool {
        self.category.as_deref() == Some(CATEGORY_TRANSFER)
    }

    fn generate_random_suffix(len: usize) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_nanos();
        format!("{:x}", now % (16_u128.pow(len as u32)))
            .chars()
            .take(len)
            .collect()
    }
}

/// How often a template item recurs.
///
/// The original client stored this field as either a boolean (`true` meant
/// monthly) or a string; [`deserialize_repeat`] still accepts both so old
/// documents keep decoding, but the Rust side only ever works with this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatRule {
    Weekly,
    Monthly,
}

/// Which half of a transfer pair an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Incoming,
    Outgoing,
}

/// The whole-document shape persisted per user. Read-modify-written
/// wholesale on every save; never patched field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    pub dashboards: Vec<Dashboard>,
    pub current_dashboard_id: String,
    #[serde(default)]
    pub dashboard_data: HashMap<String, DashboardData>,
    #[serde(default = "default_document_version")]
    pub version: u32,
    #[serde(default = "Utc::now", with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
}

fn default_document_version() -> u32 {
    DOCUMENT_VERSION
}

/// Sync engine state as surfaced to the UI status badge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Synced,
    Offline,
    Error { message: String },
}

/// Income/expense/net split for a month or a cumulative window.
/// `expenses` keeps its sign (a negative sum); `net = income + expenses`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyTotals {
    pub income: f64,
    pub expenses: f64,
    pub net: f64,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Accepts the legacy boolean encoding (`true` == monthly) alongside the
/// current string form.
fn deserialize_repeat<'de, D>(deserializer: D) -> Result<Option<RepeatRule>, D::Error>
where
    D: Deserializer<'de>,
{
    struct RepeatVisitor;

    impl<'de> serde::de::Visitor<'de> for RepeatVisitor {
        type Value = Option<RepeatRule>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("\"monthly\", \"weekly\", a boolean, or null")
        }

        fn visit_bool<E: serde::de::Error>(self, value: bool) -> Result<Self::Value, E> {
            Ok(if value { Some(RepeatRule::Monthly) } else { None })
        }

        fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
            match value {
                "monthly" => Ok(Some(RepeatRule::Monthly)),
                "weekly" => Ok(Some(RepeatRule::Weekly)),
                "" => Ok(None),
                other => Err(E::unknown_variant(other, &["monthly", "weekly"])),
            }
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, deserializer: D2) -> Result<Self::Value, D2::Error> {
            deserializer.deserialize_any(RepeatVisitor)
        }
    }

    deserializer.deserialize_option(RepeatVisitor)
}

/// The original client wrote `repeatEndDate: ""` for unbounded templates;
/// treat the empty string as absent.
fn deserialize_optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
