use crate::domain::store::{ItemDraft, ItemPatch};

#[derive(Debug, Clone)]
pub struct AddGroupCommand {
    pub title: String,
    pub is_pending: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AddGroupResult {
    pub group_id: String,
}

#[derive(Debug, Clone)]
pub struct RenameGroupCommand {
    pub group_id: String,
    pub new_title: String,
}

/// `renamed` is `false` when the group is protected or missing; validation
/// problems surface as errors instead.
#[derive(Debug, Clone)]
pub struct RenameGroupResult {
    pub renamed: bool,
}

#[derive(Debug, Clone)]
pub struct DeleteGroupCommand {
    pub group_id: String,
}

#[derive(Debug, Clone)]
pub struct DeleteGroupResult {
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct AddItemCommand {
    pub group_id: String,
    pub item: ItemDraft,
    /// Caller-supplied id; the transfer coordinator uses this to
    /// pre-allocate the cross-referenced ids of a pair.
    pub custom_id: Option<String>,
}

/// `item_id` is `None` when the group did not exist (a silent no-op).
#[derive(Debug, Clone)]
pub struct AddItemResult {
    pub item_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EditItemCommand {
    pub group_id: String,
    pub item_id: String,
    pub patch: ItemPatch,
}

#[derive(Debug, Clone)]
pub struct DeleteItemCommand {
    pub group_id: String,
    pub item_id: String,
}

#[derive(Debug, Clone)]
pub struct ReorderItemsCommand {
    pub group_id: String,
    pub ordered_ids: Vec<String>,
}
