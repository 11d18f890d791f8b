use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{Item, ItemId},
    protocol::{ChangeKind, CreateItemInput, DeleteItemInput, ItemChange, UpdateItemInput},
};
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

pub mod memory;
pub use memory::MemoryRemote;

const RESYNC_QUEUE_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The authoritative store the controller mirrors. Implementations own
/// transport, authentication, and schema concerns entirely.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    async fn list_items(&self) -> Result<Vec<Item>>;
    async fn create_item(&self, input: CreateItemInput) -> Result<Item>;
    async fn update_item(&self, input: UpdateItemInput) -> Result<Item>;
    async fn delete_item(&self, input: DeleteItemInput) -> Result<Item>;
    async fn subscribe_changes(&self, kind: ChangeKind) -> Result<Box<dyn ChangeSubscription>>;
}

/// A standing registration for one change-event kind.
#[async_trait]
pub trait ChangeSubscription: Send {
    /// Next delivered change, or `None` once the stream has ended.
    async fn next_change(&mut self) -> Option<ItemChange>;
    /// Tear down the underlying registration.
    async fn cancel(self: Box<Self>);
}

pub struct MissingRemoteDataService;

#[async_trait]
impl RemoteDataService for MissingRemoteDataService {
    async fn list_items(&self) -> Result<Vec<Item>> {
        Err(anyhow!("remote data service is unavailable"))
    }

    async fn create_item(&self, _input: CreateItemInput) -> Result<Item> {
        Err(anyhow!("remote data service is unavailable"))
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<Item> {
        Err(anyhow!(
            "remote data service is unavailable for item {}",
            input.id
        ))
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<Item> {
        Err(anyhow!(
            "remote data service is unavailable for item {}",
            input.id
        ))
    }

    async fn subscribe_changes(&self, kind: ChangeKind) -> Result<Box<dyn ChangeSubscription>> {
        Err(anyhow!(
            "remote data service is unavailable for {kind:?} subscription"
        ))
    }
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A refresh replaced the local snapshot; carries the new list.
    ItemsRefreshed(Vec<Item>),
    Error(String),
}

#[derive(Debug, Clone, Copy)]
struct ResyncRequest {
    kind: ChangeKind,
}

struct ControllerState {
    items: Vec<Item>,
    draft_description: String,
}

struct ActiveSync {
    shutdown: watch::Sender<bool>,
    forward_tasks: Vec<JoinHandle<()>>,
    resync_task: JoinHandle<()>,
}

/// Mirrors the remote item list. The local list is a derived snapshot,
/// rebuilt wholesale on every refresh; it is never a source of truth.
pub struct SyncController {
    remote: Arc<dyn RemoteDataService>,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<ControllerEvent>,
    active: Mutex<Option<ActiveSync>>,
}

impl SyncController {
    pub fn new(remote: Arc<dyn RemoteDataService>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            remote,
            inner: Mutex::new(ControllerState {
                items: Vec::new(),
                draft_description: String::new(),
            }),
            events,
            active: Mutex::new(None),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn items(&self) -> Vec<Item> {
        self.inner.lock().await.items.clone()
    }

    pub async fn draft(&self) -> String {
        self.inner.lock().await.draft_description.clone()
    }

    pub async fn set_draft(&self, text: impl Into<String>) {
        self.inner.lock().await.draft_description = text.into();
    }

    /// Fetch the complete current item set and replace the local list.
    /// On failure the previous snapshot is kept and the error propagates;
    /// there is no automatic retry.
    pub async fn refresh(&self) -> Result<Vec<Item>> {
        let items = self
            .remote
            .list_items()
            .await
            .context("failed to fetch the current item list")?;
        let snapshot = {
            let mut guard = self.inner.lock().await;
            guard.items = items;
            guard.items.clone()
        };
        let _ = self
            .events
            .send(ControllerEvent::ItemsRefreshed(snapshot.clone()));
        Ok(snapshot)
    }

    /// Create an item, then refresh. An empty description is declined
    /// locally without touching the remote store.
    pub async fn create(&self, description: &str) -> Result<()> {
        if description.is_empty() {
            debug!("declining create with empty description");
            return Ok(());
        }
        self.remote
            .create_item(CreateItemInput {
                description: description.to_string(),
            })
            .await?;
        self.inner.lock().await.draft_description.clear();
        self.refresh().await?;
        Ok(())
    }

    /// Create from the pending draft text.
    pub async fn submit_draft(&self) -> Result<()> {
        let draft = self.inner.lock().await.draft_description.clone();
        self.create(&draft).await
    }

    /// Toggle the completed flag, then refresh. The change is invisible
    /// locally until the round trip completes.
    pub async fn set_completed(&self, id: &ItemId, completed: bool) -> Result<()> {
        self.remote
            .update_item(UpdateItemInput {
                id: id.clone(),
                completed,
            })
            .await?;
        self.refresh().await?;
        Ok(())
    }

    pub async fn delete(&self, id: &ItemId) -> Result<()> {
        self.remote
            .delete_item(DeleteItemInput { id: id.clone() })
            .await?;
        self.refresh().await?;
        Ok(())
    }

    /// Establish the three change subscriptions, spawn the resync loop,
    /// and perform the initial full fetch.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut active = self.active.lock().await;
            if active.is_some() {
                return Err(anyhow!("sync controller is already started"));
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (resync_tx, resync_rx) = mpsc::channel(RESYNC_QUEUE_CAPACITY);

            let mut forward_tasks = Vec::with_capacity(ChangeKind::ALL.len());
            for kind in ChangeKind::ALL {
                let subscription = match self.remote.subscribe_changes(kind).await {
                    Ok(subscription) => subscription,
                    Err(err) => {
                        // Roll back the subscriptions that did come up.
                        let _ = shutdown_tx.send(true);
                        for task in forward_tasks {
                            let _ = task.await;
                        }
                        return Err(err)
                            .with_context(|| format!("failed to subscribe to {kind:?} changes"));
                    }
                };
                forward_tasks.push(spawn_change_forwarder(
                    kind,
                    subscription,
                    resync_tx.clone(),
                    shutdown_rx.clone(),
                ));
            }
            drop(resync_tx);

            let resync_task = self.spawn_resync_loop(resync_rx, shutdown_rx);

            *active = Some(ActiveSync {
                shutdown: shutdown_tx,
                forward_tasks,
                resync_task,
            });
        }

        self.refresh().await?;
        Ok(())
    }

    /// Cancel all subscriptions and stop resynchronizing. Safe to call
    /// when not started. A refresh already in flight is not interrupted.
    pub async fn stop(&self) {
        let Some(active) = self.active.lock().await.take() else {
            return;
        };

        let _ = active.shutdown.send(true);
        for task in active.forward_tasks {
            if let Err(err) = task.await {
                warn!("change forwarder ended abnormally: {err}");
            }
        }
        // Forwarders are gone; drop any queued resync requests with them.
        active.resync_task.abort();
        let _ = active.resync_task.await;
        debug!("sync controller stopped");
    }

    pub async fn is_started(&self) -> bool {
        self.active.lock().await.is_some()
    }

    fn spawn_resync_loop(
        self: &Arc<Self>,
        mut resync_rx: mpsc::Receiver<ResyncRequest>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    request = resync_rx.recv() => {
                        let Some(ResyncRequest { kind }) = request else { break };
                        debug!(kind = ?kind, "resynchronizing after remote change");
                        if let Err(err) = controller.refresh().await {
                            // Fire-and-forget: the list stays stale until
                            // the next successful refresh.
                            warn!(kind = ?kind, "refresh after remote change failed: {err:#}");
                            let _ = controller.events.send(ControllerEvent::Error(format!(
                                "refresh after {kind:?} event failed: {err:#}"
                            )));
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }
}

fn spawn_change_forwarder(
    kind: ChangeKind,
    mut subscription: Box<dyn ChangeSubscription>,
    resync_tx: mpsc::Sender<ResyncRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                change = subscription.next_change() => {
                    if change.is_none() {
                        debug!(kind = ?kind, "change stream closed by remote");
                        break;
                    }
                    // Payload contents are irrelevant; any change forces
                    // a full resync.
                    if resync_tx.send(ResyncRequest { kind }).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        subscription.cancel().await;
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
