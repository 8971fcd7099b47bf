// tab-sync/tests/tab_sync_test.rs
use actix::{Actor, Addr, Context, Handler};
use common::models::auth::{UserState, WalletState};
use common::{Clock, ManualClock, MessageKind, SyncConfig, SyncMessage, SyncPayload, SystemClock};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tab_sync::{subscribe, Broadcast, Close, GetState, GetSyncStatus, LocalBus, SyncNotification, TabSyncActor};

const SETTLE: Duration = Duration::from_millis(200);

struct Collector {
    seen: Arc<Mutex<Vec<SyncMessage>>>,
}

impl Actor for Collector {
    type Context = Context<Self>;
}

impl Handler<SyncNotification> for Collector {
    type Result = ();

    fn handle(&mut self, msg: SyncNotification, _ctx: &mut Self::Context) {
        self.seen.lock().unwrap().push(msg.0);
    }
}

fn collector() -> (Addr<Collector>, Arc<Mutex<Vec<SyncMessage>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let addr = Collector { seen: seen.clone() }.start();
    (addr, seen)
}

fn config() -> SyncConfig {
    SyncConfig {
        debounce_ms: 30,
        ..SyncConfig::default()
    }
}

fn start_tab(id: &str, bus: &Arc<LocalBus>, clock: Arc<dyn Clock>) -> Addr<TabSyncActor> {
    TabSyncActor::new(id.to_string(), bus.clone(), &config(), clock).start()
}

fn remote(payload: SyncPayload, timestamp: i64) -> SyncMessage {
    SyncMessage {
        payload,
        timestamp,
        origin_id: "tab-remote".to_string(),
        priority: 0,
    }
}

fn user(last_login: i64) -> UserState {
    UserState {
        uid: "uid-1".to_string(),
        email: Some("user@example.com".to_string()),
        last_login_time: Some(last_login),
        ..Default::default()
    }
}

#[actix::test]
async fn idle_tab_adopts_wallet_connection() {
    let bus = Arc::new(LocalBus::default());
    let clock_a = Arc::new(ManualClock::new(1000));
    let tab_a = start_tab("tab-a", &bus, clock_a);
    let tab_b = start_tab("tab-b", &bus, Arc::new(SystemClock));

    let (observer, seen) = collector();
    let _sub = subscribe(&tab_b, observer.recipient()).await.unwrap();

    tab_a.do_send(Broadcast::new(SyncPayload::WalletConnect(Some(WalletState::connected(
        "0xabc", 1, 1000,
    )))));
    tokio::time::sleep(SETTLE).await;

    let state = tab_b
        .send(GetState { kind: MessageKind::WalletConnect })
        .await
        .unwrap();
    let Some(SyncPayload::WalletConnect(Some(wallet))) = state else {
        panic!("wallet state not applied: {state:?}");
    };
    assert!(wallet.is_connected);
    assert_eq!(wallet.address.as_deref(), Some("0xabc"));
    assert_eq!(wallet.chain_id, Some(1));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].origin_id, "tab-a");
    assert_eq!(seen[0].timestamp, 1000);
}

#[actix::test]
async fn own_broadcasts_never_reach_local_subscribers() {
    let bus = Arc::new(LocalBus::default());
    let tab_a = start_tab("tab-a", &bus, Arc::new(SystemClock));
    let (observer, seen) = collector();
    let _sub = subscribe(&tab_a, observer.recipient()).await.unwrap();

    tab_a.do_send(Broadcast::new(SyncPayload::SessionLogout));
    bus.publish(&config().channel_name, SyncMessage {
        payload: SyncPayload::SessionExpired,
        timestamp: 10,
        origin_id: "tab-a".to_string(),
        priority: 0,
    })
    .unwrap();
    tokio::time::sleep(SETTLE).await;

    assert!(seen.lock().unwrap().is_empty());
}

#[actix::test]
async fn burst_of_same_kind_dispatches_only_last() {
    let bus = Arc::new(LocalBus::default());
    let tab_b = start_tab("tab-b", &bus, Arc::new(SystemClock));
    let (observer, seen) = collector();
    let _sub = subscribe(&tab_b, observer.recipient()).await.unwrap();

    let channel = config().channel_name;
    for (chain_id, ts) in [(1u64, 100i64), (137, 101), (10, 102)] {
        bus.publish(&channel, remote(SyncPayload::NetworkChange { chain_id }, ts))
            .unwrap();
    }
    tokio::time::sleep(SETTLE).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload, SyncPayload::NetworkChange { chain_id: 10 });
}

#[actix::test]
async fn different_kinds_are_not_collapsed() {
    let bus = Arc::new(LocalBus::default());
    let tab_b = start_tab("tab-b", &bus, Arc::new(SystemClock));
    let (observer, seen) = collector();
    let _sub = subscribe(&tab_b, observer.recipient()).await.unwrap();

    let channel = config().channel_name;
    bus.publish(&channel, remote(SyncPayload::NetworkChange { chain_id: 1 }, 100))
        .unwrap();
    bus.publish(&channel, remote(SyncPayload::WalletDisconnect, 101)).unwrap();
    tokio::time::sleep(SETTLE).await;

    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[actix::test]
async fn stale_messages_are_dropped() {
    let bus = Arc::new(LocalBus::default());
    let tab_b = start_tab("tab-b", &bus, Arc::new(SystemClock));
    let (observer, seen) = collector();
    let _sub = subscribe(&tab_b, observer.recipient()).await.unwrap();
    let channel = config().channel_name;

    bus.publish(&channel, remote(SyncPayload::NetworkChange { chain_id: 137 }, 2000))
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    bus.publish(&channel, remote(SyncPayload::NetworkChange { chain_id: 1 }, 1000))
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    assert_eq!(seen.lock().unwrap().len(), 1);
    let state = tab_b
        .send(GetState { kind: MessageKind::NetworkChange })
        .await
        .unwrap();
    assert_eq!(state, Some(SyncPayload::NetworkChange { chain_id: 137 }));

    let status = tab_b.send(GetSyncStatus).await.unwrap();
    assert_eq!(status.last_processed_timestamp, 2000);
    assert_eq!(status.pending_updates, 0);
}

#[actix::test]
async fn concurrent_user_updates_keep_latest_login() {
    let bus = Arc::new(LocalBus::default());
    let tab_a = start_tab("tab-a", &bus, Arc::new(SystemClock));
    let tab_b = start_tab("tab-b", &bus, Arc::new(SystemClock));

    tab_a.do_send(Broadcast::new(SyncPayload::UpdateUser(Some(user(2_000)))));
    tokio::time::sleep(Duration::from_millis(10)).await;
    tab_b.do_send(Broadcast::new(SyncPayload::UpdateUser(Some(user(1_000)))));
    tokio::time::sleep(SETTLE).await;

    for tab in [&tab_a, &tab_b] {
        let state = tab.send(GetState { kind: MessageKind::UpdateUser }).await.unwrap();
        let Some(SyncPayload::UpdateUser(Some(merged))) = state else {
            panic!("user state missing: {state:?}");
        };
        assert_eq!(merged.last_login_time, Some(2_000));
    }
}

#[actix::test]
async fn session_logout_forgets_cached_user() {
    let bus = Arc::new(LocalBus::default());
    let tab_b = start_tab("tab-b", &bus, Arc::new(SystemClock));
    let (observer, seen) = collector();
    let _sub = subscribe(&tab_b, observer.recipient()).await.unwrap();
    let channel = config().channel_name;

    bus.publish(&channel, remote(SyncPayload::UpdateUser(Some(user(1_000))), 1_000))
        .unwrap();
    tokio::time::sleep(SETTLE).await;
    bus.publish(&channel, remote(SyncPayload::SessionLogout, 2_000)).unwrap();
    tokio::time::sleep(SETTLE).await;

    let state = tab_b.send(GetState { kind: MessageKind::UpdateUser }).await.unwrap();
    assert_eq!(state, None);

    // A later sign-out of the user is delivered as-is, not merged with the old record
    bus.publish(&channel, remote(SyncPayload::UpdateUser(None), 3_000)).unwrap();
    tokio::time::sleep(SETTLE).await;
    let last = seen.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.payload, SyncPayload::UpdateUser(None));
}

#[actix::test]
async fn local_session_expiry_forgets_cached_user() {
    let bus = Arc::new(LocalBus::default());
    let tab_a = start_tab("tab-a", &bus, Arc::new(SystemClock));

    tab_a.do_send(Broadcast::new(SyncPayload::UpdateUser(Some(user(1_000)))));
    tab_a.do_send(Broadcast::new(SyncPayload::SessionExpired));

    let state = tab_a.send(GetState { kind: MessageKind::UpdateUser }).await.unwrap();
    assert_eq!(state, None);
}

#[actix::test]
async fn unsubscribe_is_idempotent() {
    let bus = Arc::new(LocalBus::default());
    let tab_b = start_tab("tab-b", &bus, Arc::new(SystemClock));
    let (observer, seen) = collector();
    let sub = subscribe(&tab_b, observer.recipient()).await.unwrap();

    sub.unsubscribe();
    sub.unsubscribe();
    assert!(!sub.is_active());

    bus.publish(&config().channel_name, remote(SyncPayload::SessionLogout, 5))
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(tab_b.send(GetSyncStatus).await.unwrap().subscribers, 0);
}

#[actix::test]
async fn dropping_subscription_unsubscribes() {
    let bus = Arc::new(LocalBus::default());
    let tab_b = start_tab("tab-b", &bus, Arc::new(SystemClock));
    let (observer, _seen) = collector();

    {
        let _sub = subscribe(&tab_b, observer.recipient()).await.unwrap();
        assert_eq!(tab_b.send(GetSyncStatus).await.unwrap().subscribers, 1);
    }

    assert_eq!(tab_b.send(GetSyncStatus).await.unwrap().subscribers, 0);
}

#[actix::test]
async fn close_cancels_pending_updates() {
    let bus = Arc::new(LocalBus::default());
    let tab_b = start_tab("tab-b", &bus, Arc::new(SystemClock));
    let (observer, seen) = collector();
    let _sub = subscribe(&tab_b, observer.recipient()).await.unwrap();

    bus.publish(&config().channel_name, remote(SyncPayload::WalletDisconnect, 5))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    tab_b.send(Close).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    assert!(seen.lock().unwrap().is_empty());
    assert!(!tab_b.connected());
}

#[actix::test]
async fn single_tab_broadcast_degrades_silently() {
    let bus = Arc::new(LocalBus::default());
    let tab_a = start_tab("tab-a", &bus, Arc::new(SystemClock));

    bus.close();
    tab_a.do_send(Broadcast::new(SyncPayload::SessionLogout));

    // The local cache still reflects what this tab announced
    let state = tab_a
        .send(GetState { kind: MessageKind::SessionLogout })
        .await
        .unwrap();
    assert_eq!(state, Some(SyncPayload::SessionLogout));
}
