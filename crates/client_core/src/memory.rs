//! In-process Remote Data Service used by the demo frontend and tests.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{Item, ItemId},
    error::RemoteCallError,
    protocol::{ChangeKind, CreateItemInput, DeleteItemInput, ItemChange, UpdateItemInput},
};
use tokio::sync::{broadcast, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::{ChangeSubscription, RemoteDataService};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

pub struct MemoryRemote {
    items: Mutex<Vec<Item>>,
    changes: broadcast::Sender<ItemChange>,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            changes,
        })
    }

    fn publish(&self, kind: ChangeKind, item: Item) {
        let _ = self.changes.send(ItemChange {
            kind,
            item: Some(item),
        });
    }
}

#[async_trait]
impl RemoteDataService for MemoryRemote {
    async fn list_items(&self) -> Result<Vec<Item>> {
        Ok(self.items.lock().await.clone())
    }

    async fn create_item(&self, input: CreateItemInput) -> Result<Item> {
        if input.description.is_empty() {
            return Err(RemoteCallError::validation("description must not be empty").into());
        }
        let now = Utc::now();
        let item = Item {
            id: ItemId(Uuid::new_v4().to_string()),
            description: input.description,
            completed: false,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.items.lock().await.push(item.clone());
        self.publish(ChangeKind::Created, item.clone());
        Ok(item)
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<Item> {
        let updated = {
            let mut items = self.items.lock().await;
            let Some(item) = items.iter_mut().find(|item| item.id == input.id) else {
                return Err(
                    RemoteCallError::not_found(format!("no item with id {}", input.id)).into(),
                );
            };
            item.completed = input.completed;
            item.updated_at = Some(Utc::now());
            item.clone()
        };
        self.publish(ChangeKind::Updated, updated.clone());
        Ok(updated)
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<Item> {
        let removed = {
            let mut items = self.items.lock().await;
            let Some(position) = items.iter().position(|item| item.id == input.id) else {
                return Err(
                    RemoteCallError::not_found(format!("no item with id {}", input.id)).into(),
                );
            };
            items.remove(position)
        };
        self.publish(ChangeKind::Deleted, removed.clone());
        Ok(removed)
    }

    async fn subscribe_changes(&self, kind: ChangeKind) -> Result<Box<dyn ChangeSubscription>> {
        Ok(Box::new(MemoryChangeSubscription {
            kind,
            rx: self.changes.subscribe(),
        }))
    }
}

struct MemoryChangeSubscription {
    kind: ChangeKind,
    rx: broadcast::Receiver<ItemChange>,
}

#[async_trait]
impl ChangeSubscription for MemoryChangeSubscription {
    async fn next_change(&mut self) -> Option<ItemChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.kind == self.kind => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(kind = ?self.kind, skipped, "subscription lagged behind change feed");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn cancel(self: Box<Self>) {}
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
