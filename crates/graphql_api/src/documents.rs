//! GraphQL documents for the item API, matching the managed schema's
//! generated operation shapes.

use shared::protocol::ChangeKind;

pub const LIST_ITEMS: &str = "query ListItems($limit: Int, $nextToken: String) { \
     listItems(limit: $limit, nextToken: $nextToken) { \
     items { id description completed createdAt updatedAt } nextToken } }";

pub const CREATE_ITEM: &str = "mutation CreateItem($input: CreateItemInput!) { \
     createItem(input: $input) { id description completed createdAt updatedAt } }";

pub const UPDATE_ITEM: &str = "mutation UpdateItem($input: UpdateItemInput!) { \
     updateItem(input: $input) { id description completed createdAt updatedAt } }";

pub const DELETE_ITEM: &str = "mutation DeleteItem($input: DeleteItemInput!) { \
     deleteItem(input: $input) { id description completed createdAt updatedAt } }";

pub const ON_CREATE_ITEM: &str =
    "subscription OnCreateItem { onCreateItem { id description completed createdAt updatedAt } }";

pub const ON_UPDATE_ITEM: &str =
    "subscription OnUpdateItem { onUpdateItem { id description completed createdAt updatedAt } }";

pub const ON_DELETE_ITEM: &str =
    "subscription OnDeleteItem { onDeleteItem { id description completed createdAt updatedAt } }";

pub fn subscription_document(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Created => ON_CREATE_ITEM,
        ChangeKind::Updated => ON_UPDATE_ITEM,
        ChangeKind::Deleted => ON_DELETE_ITEM,
    }
}

pub fn subscription_field(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Created => "onCreateItem",
        ChangeKind::Updated => "onUpdateItem",
        ChangeKind::Deleted => "onDeleteItem",
    }
}
