//! # Document Schema Migration
//!
//! The persisted document shape has evolved three times:
//!
//! - **v1** stored `scheduleGroups` as an array of groups, each with an
//!   `items` array, and no stable ids anywhere.
//! - **v2** moved groups and items into id-keyed maps but still knew only a
//!   single implicit dashboard.
//! - **v3** (current) is the multi-dashboard layout in [`shared::UserDocument`].
//!
//! Old clients left fallback defaults scattered through their load logic;
//! here every document instead passes through [`migrate`] exactly once, at
//! load time, and the rest of the core only ever sees the current shape.
//! Legacy `repeat: true` booleans are handled separately by the
//! [`shared::RepeatRule`] deserializer.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::info;
use serde_json::{json, Map, Value};
use shared::{ScheduleItem, UserDocument, DOCUMENT_VERSION};

/// Upgrade a raw document of any known vintage to the current shape and
/// decode it.
pub fn migrate(raw: Value) -> Result<UserDocument> {
    let version = detect_version(&raw)?;

    let upgraded = match version {
        1 => {
            info!("migrating v1 document (array-based groups)");
            let groups = match raw.get("scheduleGroups") {
                Some(Value::Array(list)) => groups_array_to_map(list.clone()),
                _ => Map::new(),
            };
            wrap_single_dashboard(groups, raw.get("lastUpdated").cloned())
        }
        2 => {
            info!("migrating v2 document (single-dashboard map)");
            let groups = match raw.get("scheduleGroups") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            wrap_single_dashboard(groups, raw.get("lastUpdated").cloned())
        }
        3 => {
            let mut raw = raw;
            if let Some(object) = raw.as_object_mut() {
                object.insert("version".to_string(), json!(DOCUMENT_VERSION));
            }
            raw
        }
        other => bail!("unsupported document version {other}"),
    };

    serde_json::from_value(upgraded).context("decoding migrated user document")
}

/// Read the explicit `version` field, or infer the vintage from the shape
/// for documents written before the field existed.
fn detect_version(raw: &Value) -> Result<u64> {
    if let Some(version) = raw.get("version").and_then(Value::as_u64) {
        return Ok(version);
    }
    if raw.get("dashboards").is_some() {
        return Ok(3);
    }
    match raw.get("scheduleGroups") {
        Some(Value::Array(_)) => Ok(1),
        Some(Value::Object(_)) => Ok(2),
        _ => bail!("unrecognized document shape; cannot determine schema version"),
    }
}

fn groups_array_to_map(groups: Vec<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    for (position, group) in groups.into_iter().enumerate() {
        let Value::Object(mut group) = group else {
            continue;
        };
        let id = ensure_string_id(&mut group, || uuid::Uuid::new_v4().to_string());
        group
            .entry("orderIndex")
            .or_insert_with(|| json!(position as u32));

        let items = match group.remove("items") {
            Some(Value::Array(list)) => items_array_to_map(list),
            Some(Value::Object(items)) => items,
            _ => Map::new(),
        };
        group.insert("items".to_string(), Value::Object(items));
        map.insert(id, Value::Object(group));
    }
    map
}

fn items_array_to_map(items: Vec<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    for (position, item) in items.into_iter().enumerate() {
        let Value::Object(mut item) = item else {
            continue;
        };
        let amount = item.get("amount").and_then(Value::as_f64).unwrap_or(0.0);
        let id = ensure_string_id(&mut item, || {
            ScheduleItem::generate_id(amount, Utc::now().timestamp_millis() as u64)
        });
        item.entry("orderIndex")
            .or_insert_with(|| json!(position as u32));
        item.entry("createdAt")
            .or_insert_with(|| json!(Utc::now().timestamp_millis()));
        map.insert(id, Value::Object(item));
    }
    map
}

fn ensure_string_id(object: &mut Map<String, Value>, mint: impl FnOnce() -> String) -> String {
    match object.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let id = mint();
            object.insert("id".to_string(), json!(id));
            id
        }
    }
}

fn wrap_single_dashboard(groups: Map<String, Value>, last_updated: Option<Value>) -> Value {
    let dashboard_id = uuid::Uuid::new_v4().to_string();
    let now = json!(Utc::now().timestamp_millis());

    let mut dashboard_data = Map::new();
    dashboard_data.insert(
        dashboard_id.clone(),
        json!({
            "scheduleGroups": groups,
            "lastModified": now.clone(),
            "sharedWith": [],
        }),
    );

    json!({
        "dashboards": [{ "id": dashboard_id, "name": "Personal" }],
        "currentDashboardId": dashboard_id,
        "dashboardData": dashboard_data,
        "version": DOCUMENT_VERSION,
        "lastUpdated": last_updated.unwrap_or(now),
    })
}
