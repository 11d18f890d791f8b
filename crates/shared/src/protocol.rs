use serde::{Deserialize, Serialize};

use crate::domain::{Item, ItemId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItemInput {
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateItemInput {
    pub id: ItemId,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteItemInput {
    pub id: ItemId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] =
        [ChangeKind::Created, ChangeKind::Updated, ChangeKind::Deleted];
}

/// One delivered remote change. The payload is informational; consumers
/// resynchronize with a full fetch rather than merging it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemChange {
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
}
