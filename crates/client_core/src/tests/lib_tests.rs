use super::*;
use std::time::Duration;

use tokio::time::timeout;

struct TestRemote {
    items: Mutex<Vec<Item>>,
    next_id: Mutex<u32>,
    list_calls: Mutex<u32>,
    create_calls: Mutex<Vec<String>>,
    fail_list: Mutex<bool>,
    cancelled: Arc<Mutex<Vec<ChangeKind>>>,
    changes: broadcast::Sender<ItemChange>,
}

impl TestRemote {
    fn new() -> Arc<Self> {
        let (changes, _) = broadcast::channel(64);
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            list_calls: Mutex::new(0),
            create_calls: Mutex::new(Vec::new()),
            fail_list: Mutex::new(false),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            changes,
        })
    }

    fn push_change(&self, kind: ChangeKind) {
        let _ = self.changes.send(ItemChange { kind, item: None });
    }

    async fn set_fail_list(&self, fail: bool) {
        *self.fail_list.lock().await = fail;
    }

    async fn list_call_count(&self) -> u32 {
        *self.list_calls.lock().await
    }
}

#[async_trait]
impl RemoteDataService for TestRemote {
    async fn list_items(&self) -> Result<Vec<Item>> {
        *self.list_calls.lock().await += 1;
        if *self.fail_list.lock().await {
            return Err(anyhow!("listing is down"));
        }
        Ok(self.items.lock().await.clone())
    }

    async fn create_item(&self, input: CreateItemInput) -> Result<Item> {
        self.create_calls
            .lock()
            .await
            .push(input.description.clone());
        let id = {
            let mut next_id = self.next_id.lock().await;
            *next_id += 1;
            ItemId(format!("item-{}", *next_id))
        };
        let item = Item {
            id,
            description: input.description,
            completed: false,
            created_at: None,
            updated_at: None,
        };
        self.items.lock().await.push(item.clone());
        Ok(item)
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<Item> {
        let mut items = self.items.lock().await;
        let item = items
            .iter_mut()
            .find(|item| item.id == input.id)
            .ok_or_else(|| anyhow!("no item with id {}", input.id))?;
        item.completed = input.completed;
        Ok(item.clone())
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<Item> {
        let mut items = self.items.lock().await;
        let position = items
            .iter()
            .position(|item| item.id == input.id)
            .ok_or_else(|| anyhow!("no item with id {}", input.id))?;
        Ok(items.remove(position))
    }

    async fn subscribe_changes(&self, kind: ChangeKind) -> Result<Box<dyn ChangeSubscription>> {
        Ok(Box::new(TestSubscription {
            kind,
            rx: self.changes.subscribe(),
            cancelled: Arc::clone(&self.cancelled),
        }))
    }
}

struct TestSubscription {
    kind: ChangeKind,
    rx: broadcast::Receiver<ItemChange>,
    cancelled: Arc<Mutex<Vec<ChangeKind>>>,
}

#[async_trait]
impl ChangeSubscription for TestSubscription {
    async fn next_change(&mut self) -> Option<ItemChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.kind == self.kind => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn cancel(self: Box<Self>) {
        self.cancelled.lock().await.push(self.kind);
    }
}

async fn wait_for_list_calls(remote: &TestRemote, expected: u32) {
    timeout(Duration::from_secs(2), async {
        loop {
            if remote.list_call_count().await >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for refreshes");
}

#[tokio::test]
async fn create_then_refresh_adds_exactly_one_item() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());

    controller.create("Buy milk").await.expect("create");

    let items = controller.items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].description, "Buy milk");
    assert!(!items[0].id.0.is_empty());
    assert_eq!(remote.create_calls.lock().await.clone(), vec!["Buy milk"]);
}

#[tokio::test]
async fn create_with_empty_description_is_a_local_no_op() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());

    controller.create("").await.expect("no-op");

    assert!(remote.create_calls.lock().await.is_empty());
    assert_eq!(remote.list_call_count().await, 0);
    assert!(controller.items().await.is_empty());
}

#[tokio::test]
async fn delete_removes_only_the_target_item() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());
    controller.create("first").await.expect("create");
    controller.create("second").await.expect("create");

    let first_id = controller.items().await[0].id.clone();
    controller.delete(&first_id).await.expect("delete");

    let remaining = controller.items().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].description, "second");
    assert!(!remaining[0].completed);
}

#[tokio::test]
async fn set_completed_is_an_idempotent_toggle() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());
    controller.create("task").await.expect("create");
    let id = controller.items().await[0].id.clone();

    controller.set_completed(&id, true).await.expect("complete");
    assert!(controller.items().await[0].completed);

    controller
        .set_completed(&id, true)
        .await
        .expect("complete again");
    assert!(controller.items().await[0].completed);

    controller.set_completed(&id, false).await.expect("reopen");
    assert!(!controller.items().await[0].completed);
}

#[tokio::test]
async fn refresh_without_mutation_is_stable() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());
    controller.create("one").await.expect("create");
    controller.create("two").await.expect("create");

    let first = controller.refresh().await.expect("refresh");
    let second = controller.refresh().await.expect("refresh");
    assert_eq!(first, second);
}

#[tokio::test]
async fn refresh_failure_keeps_the_last_known_snapshot() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());
    controller.create("keep me").await.expect("create");

    remote.set_fail_list(true).await;
    let err = controller.refresh().await.expect_err("must fail");
    assert!(err.to_string().contains("failed to fetch"));

    let items = controller.items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].description, "keep me");
}

#[tokio::test]
async fn create_with_failed_refresh_underreports_until_next_refresh() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());

    remote.set_fail_list(true).await;
    controller
        .create("hidden for now")
        .await
        .expect_err("refresh fails after a successful create");
    assert_eq!(remote.create_calls.lock().await.len(), 1);
    assert!(controller.items().await.is_empty());

    remote.set_fail_list(false).await;
    let items = controller.refresh().await.expect("refresh");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].description, "hidden for now");
}

#[tokio::test]
async fn each_remote_event_triggers_exactly_one_refresh() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());
    controller.start().await.expect("start");
    assert_eq!(remote.list_call_count().await, 1);

    remote.push_change(ChangeKind::Created);
    remote.push_change(ChangeKind::Updated);
    remote.push_change(ChangeKind::Deleted);

    wait_for_list_calls(&remote, 4).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.list_call_count().await, 4);

    controller.stop().await;
}

#[tokio::test]
async fn stop_cancels_all_subscriptions_and_refreshes() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());
    controller.start().await.expect("start");

    controller.stop().await;
    assert!(!controller.is_started().await);

    let cancelled = remote.cancelled.lock().await.clone();
    for kind in ChangeKind::ALL {
        assert!(cancelled.contains(&kind), "missing cancel for {kind:?}");
    }

    remote.push_change(ChangeKind::Created);
    remote.push_change(ChangeKind::Deleted);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(remote.list_call_count().await, 1);
}

#[tokio::test]
async fn start_twice_without_stop_fails() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());
    controller.start().await.expect("start");
    controller.start().await.expect_err("second start must fail");

    controller.stop().await;
    controller.start().await.expect("restart after stop");
    controller.stop().await;
}

#[tokio::test]
async fn start_fails_when_the_remote_is_unavailable() {
    let controller = SyncController::new(Arc::new(MissingRemoteDataService));
    let err = controller.start().await.expect_err("must fail");
    assert!(err.to_string().contains("failed to subscribe"));
    assert!(!controller.is_started().await);
}

#[tokio::test]
async fn submit_draft_creates_and_clears_the_draft() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());

    controller.set_draft("from draft").await;
    controller.submit_draft().await.expect("submit");

    assert_eq!(controller.draft().await, "");
    assert_eq!(controller.items().await[0].description, "from draft");
}

#[tokio::test]
async fn empty_draft_submission_is_declined() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());

    controller.submit_draft().await.expect("no-op");

    assert!(remote.create_calls.lock().await.is_empty());
}

#[tokio::test]
async fn event_stream_carries_refreshed_snapshots() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());
    let mut rx = controller.subscribe_events();

    controller.create("observed").await.expect("create");

    let event = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event timeout")
        .expect("event");
    match event {
        ControllerEvent::ItemsRefreshed(items) => {
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].description, "observed");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn failed_event_refresh_surfaces_error_and_keeps_snapshot() {
    let remote = TestRemote::new();
    let controller = SyncController::new(remote.clone());
    controller.create("steady").await.expect("create");
    controller.start().await.expect("start");

    remote.set_fail_list(true).await;
    let mut rx = controller.subscribe_events();
    remote.push_change(ChangeKind::Updated);

    let message = timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(ControllerEvent::Error(message)) = rx.recv().await {
                break message;
            }
        }
    })
    .await
    .expect("error event timeout");
    assert!(message.contains("Updated"), "unexpected message: {message}");

    let items = controller.items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].description, "steady");

    controller.stop().await;
}

#[tokio::test]
async fn full_scenario_against_the_in_memory_store() {
    let remote = MemoryRemote::new();
    let controller = SyncController::new(remote.clone());

    assert!(controller.refresh().await.expect("refresh").is_empty());

    controller.create("Buy milk").await.expect("create");
    let items = controller.items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].description, "Buy milk");
    assert!(!items[0].completed);

    let id = items[0].id.clone();
    controller.set_completed(&id, true).await.expect("complete");
    assert!(controller.items().await[0].completed);

    controller.delete(&id).await.expect("delete");
    assert!(controller.items().await.is_empty());
}
