use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct AddTransferCommand {
    pub from_dashboard_id: String,
    pub from_group_id: String,
    pub to_dashboard_id: String,
    /// Defaults to the target dashboard's running-ledger group when `None`.
    pub to_group_id: Option<String>,
    pub title: String,
    /// Magnitude of the movement; the coordinator assigns signs per side.
    pub amount: f64,
    pub date: NaiveDate,
    pub icon: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AddTransferResult {
    pub outgoing_id: String,
    pub incoming_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct EditTransferCommand {
    pub dashboard_id: String,
    pub group_id: String,
    pub item_id: String,
    /// New title for the edited side; the counterpart keeps its auto title.
    pub title: Option<String>,
    /// New unsigned magnitude applied to both sides.
    pub amount: Option<f64>,
    pub date: Option<NaiveDate>,
    pub icon: Option<Option<String>>,
    /// Must remain "Transfer" when provided; anything else is rejected.
    pub category: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EditTransferResult {
    pub success_message: String,
}

#[derive(Debug, Clone)]
pub struct DeleteTransferCommand {
    pub dashboard_id: String,
    pub group_id: String,
    pub item_id: String,
}

#[derive(Debug, Clone)]
pub struct DeleteTransferResult {
    pub removed_outgoing_id: String,
    pub removed_incoming_id: String,
}
