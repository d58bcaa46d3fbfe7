use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct AdjustBalanceCommand {
    /// Group receiving the synthesized adjustment item; conventionally the
    /// protected running-ledger group.
    pub group_id: String,
    /// The balance the user says is real.
    pub actual_balance: f64,
    /// The month the user is looking at; adjustments are only permitted for
    /// the present calendar month.
    pub viewed_month: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct AdjustBalanceResult {
    /// `None` when the computed balance already matched and nothing was
    /// inserted.
    pub adjustment_item_id: Option<String>,
    pub difference: f64,
}
