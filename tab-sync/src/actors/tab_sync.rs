// tab-sync/src/actors/tab_sync.rs
use actix::{Actor, ActorContext, AsyncContext, Context, Handler, Message, MessageResult, Recipient, SpawnHandle, StreamHandler};
use common::{Clock, MessageKind, SyncConfig, SyncMessage, SyncPayload};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::bus::LocalBus;
use crate::resolver::ResolverRegistry;

const LOG_CATEGORY: &str = "TabSync";

pub type SubscriberId = u64;

/// Resolved state change delivered to subscribers
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct SyncNotification(pub SyncMessage);

/// Broadcast a local state change to every other tab
#[derive(Debug, Message)]
#[rtype(result = "()")]
pub struct Broadcast {
    pub payload: SyncPayload,
    pub priority: i32,
}

impl Broadcast {
    pub fn new(payload: SyncPayload) -> Self {
        Self { payload, priority: 0 }
    }
}

#[derive(Message)]
#[rtype(result = "SubscriberId")]
pub struct Subscribe {
    pub recipient: Recipient<SyncNotification>,
}

#[derive(Debug, Message)]
#[rtype(result = "()")]
pub struct Unsubscribe {
    pub id: SubscriberId,
}

/// Read this tab's cached state for one message kind
#[derive(Debug, Message)]
#[rtype(result = "Option<SyncPayload>")]
pub struct GetState {
    pub kind: MessageKind,
}

#[derive(Debug, Message)]
#[rtype(result = "SyncStatus")]
pub struct GetSyncStatus;

/// Tear the tab down: cancel pending updates, drop subscribers, stop the actor
#[derive(Debug, Message)]
#[rtype(result = "()")]
pub struct Close;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub tab_id: String,
    pub last_processed_timestamp: i64,
    pub pending_updates: usize,
    pub subscribers: usize,
    pub closed: bool,
}

// At most one pending entry per message kind
struct PendingUpdate {
    message: SyncMessage,
    handle: SpawnHandle,
}

/// Per-tab synchronizer: filters, debounces and resolves messages from other tabs
pub struct TabSyncActor {
    tab_id: String,
    channel_name: String,
    debounce: Duration,
    bus: Arc<LocalBus>,
    clock: Arc<dyn Clock>,
    receiver: Option<broadcast::Receiver<SyncMessage>>,
    resolvers: ResolverRegistry,
    state_queue: HashMap<MessageKind, PendingUpdate>,
    current_state: HashMap<MessageKind, SyncPayload>,
    subscribers: HashMap<SubscriberId, Recipient<SyncNotification>>,
    next_subscriber_id: SubscriberId,
    last_processed_timestamp: i64,
    closed: bool,
}

impl TabSyncActor {
    pub fn new(tab_id: String, bus: Arc<LocalBus>, config: &SyncConfig, clock: Arc<dyn Clock>) -> Self {
        // Subscribe now so nothing published before the actor starts is missed
        let receiver = bus.subscribe(&config.channel_name);

        Self {
            tab_id,
            channel_name: config.channel_name.clone(),
            debounce: config.debounce(),
            bus,
            clock,
            receiver: Some(receiver),
            resolvers: ResolverRegistry::default(),
            state_queue: HashMap::new(),
            current_state: HashMap::new(),
            subscribers: HashMap::new(),
            next_subscriber_id: 1,
            last_processed_timestamp: 0,
            closed: false,
        }
    }

    pub fn with_resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    fn handle_incoming(&mut self, message: SyncMessage, ctx: &mut Context<Self>) {
        if self.closed {
            return;
        }

        if message.origin_id == self.tab_id {
            return;
        }

        if message.timestamp < self.last_processed_timestamp {
            tracing::debug!(
                category = LOG_CATEGORY,
                kind = %message.kind(),
                timestamp = message.timestamp,
                last_processed = self.last_processed_timestamp,
                "Dropping stale sync message"
            );
            return;
        }

        self.queue_state_update(message, ctx);
    }

    fn queue_state_update(&mut self, message: SyncMessage, ctx: &mut Context<Self>) {
        let kind = message.kind();

        if let Some(pending) = self.state_queue.remove(&kind) {
            ctx.cancel_future(pending.handle);
            tracing::trace!(category = LOG_CATEGORY, %kind, "Superseded pending sync message");
        }

        let handle = ctx.run_later(self.debounce, move |act, _ctx| {
            act.process_state_update(kind);
        });

        self.state_queue.insert(kind, PendingUpdate { message, handle });
    }

    fn process_state_update(&mut self, kind: MessageKind) {
        let Some(PendingUpdate { message, .. }) = self.state_queue.remove(&kind) else {
            return;
        };

        self.last_processed_timestamp = self.last_processed_timestamp.max(message.timestamp);

        let SyncMessage {
            payload,
            timestamp,
            origin_id,
            priority,
        } = message;

        let resolved = self.resolvers.resolve(kind, self.current_state.get(&kind), payload);
        self.record_state(kind, resolved.clone());

        tracing::debug!(
            category = LOG_CATEGORY,
            %kind,
            origin = %origin_id,
            timestamp,
            "Applied state from another tab"
        );

        self.notify_subscribers(SyncMessage {
            payload: resolved,
            timestamp,
            origin_id,
            priority,
        });
    }

    fn record_state(&mut self, kind: MessageKind, payload: SyncPayload) {
        // An ended session must not leave a user behind for the resolver to merge back in
        if matches!(kind, MessageKind::SessionLogout | MessageKind::SessionExpired) {
            self.current_state.remove(&MessageKind::UpdateUser);
        }
        self.current_state.insert(kind, payload);
    }

    fn notify_subscribers(&self, message: SyncMessage) {
        for subscriber in self.subscribers.values() {
            subscriber.do_send(SyncNotification(message.clone()));
        }
    }

    fn cancel_pending(&mut self, ctx: &mut Context<Self>) {
        for (_, pending) in self.state_queue.drain() {
            ctx.cancel_future(pending.handle);
        }
    }
}

impl Actor for TabSyncActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(category = LOG_CATEGORY, tab_id = %self.tab_id, "Tab sync started on {}", self.channel_name);

        if let Some(receiver) = self.receiver.take() {
            ctx.add_stream(BroadcastStream::new(receiver));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(category = LOG_CATEGORY, tab_id = %self.tab_id, "Tab sync stopped");
    }
}

impl StreamHandler<Result<SyncMessage, BroadcastStreamRecvError>> for TabSyncActor {
    fn handle(&mut self, item: Result<SyncMessage, BroadcastStreamRecvError>, ctx: &mut Self::Context) {
        match item {
            Ok(message) => self.handle_incoming(message, ctx),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(category = LOG_CATEGORY, skipped, "Sync listener lagged, messages dropped");
            }
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // Keep serving local subscribers; sync degrades to this tab only
        tracing::warn!(category = LOG_CATEGORY, tab_id = %self.tab_id, "Sync channel closed, continuing without other tabs");
    }
}

impl Handler<Broadcast> for TabSyncActor {
    type Result = ();

    fn handle(&mut self, msg: Broadcast, _ctx: &mut Self::Context) -> Self::Result {
        if self.closed {
            tracing::debug!(category = LOG_CATEGORY, "Broadcast after close ignored");
            return;
        }

        let message = SyncMessage {
            payload: msg.payload,
            timestamp: self.clock.now_millis(),
            origin_id: self.tab_id.clone(),
            priority: msg.priority,
        };
        self.record_state(message.kind(), message.payload.clone());

        if let Err(e) = self.bus.publish(&self.channel_name, message) {
            tracing::debug!(category = LOG_CATEGORY, error = %e, "Broadcast not delivered");
        }
    }
}

impl Handler<Subscribe> for TabSyncActor {
    type Result = MessageResult<Subscribe>;

    fn handle(&mut self, msg: Subscribe, _ctx: &mut Self::Context) -> Self::Result {
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.insert(id, msg.recipient);

        tracing::debug!(category = LOG_CATEGORY, subscriber = id, "Subscriber registered");
        MessageResult(id)
    }
}

impl Handler<Unsubscribe> for TabSyncActor {
    type Result = ();

    fn handle(&mut self, msg: Unsubscribe, _ctx: &mut Self::Context) -> Self::Result {
        if self.subscribers.remove(&msg.id).is_some() {
            tracing::debug!(category = LOG_CATEGORY, subscriber = msg.id, "Subscriber removed");
        }
    }
}

impl Handler<GetState> for TabSyncActor {
    type Result = MessageResult<GetState>;

    fn handle(&mut self, msg: GetState, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.current_state.get(&msg.kind).cloned())
    }
}

impl Handler<GetSyncStatus> for TabSyncActor {
    type Result = MessageResult<GetSyncStatus>;

    fn handle(&mut self, _msg: GetSyncStatus, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(SyncStatus {
            tab_id: self.tab_id.clone(),
            last_processed_timestamp: self.last_processed_timestamp,
            pending_updates: self.state_queue.len(),
            subscribers: self.subscribers.len(),
            closed: self.closed,
        })
    }
}

impl Handler<Close> for TabSyncActor {
    type Result = ();

    fn handle(&mut self, _msg: Close, ctx: &mut Self::Context) -> Self::Result {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel_pending(ctx);
        self.subscribers.clear();

        tracing::info!(category = LOG_CATEGORY, tab_id = %self.tab_id, "Closing tab sync");
        ctx.stop();
    }
}
