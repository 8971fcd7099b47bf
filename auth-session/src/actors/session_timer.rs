// auth-session/src/actors/session_timer.rs
use actix::{Actor, ActorContext, AsyncContext, Context, Handler, Message, MessageResult, Recipient, SpawnHandle};
use chrono::{TimeZone, Utc};
use common::models::auth::UserState;
use common::models::session::SessionInfo;
use common::{AuthError, AuthErrorCode, Clock, NotificationOptions, NotificationSink, SessionConfig, SyncPayload};
use std::sync::Arc;
use tab_sync::{Broadcast, SyncNotification};

use crate::lockout::LoginGuard;
use crate::state_store::StateStore;
use crate::utils::token::create_session_id;

const LOG_CATEGORY: &str = "SessionTimer";
const SESSION_TOAST: &str = "session";

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Logout,
    Expired,
    RefreshFailed,
    /// Another tab ended it; not re-broadcast
    Remote,
}

/// Lifecycle events for local observers
#[derive(Debug, Clone, PartialEq, Eq, Message)]
#[rtype(result = "()")]
pub enum SessionEvent {
    Started(SessionInfo),
    Refreshed(SessionInfo),
    Ended(EndReason),
}

/// Outcome of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    NoSession,
    Valid,
    Refreshed,
    Expired,
}

#[derive(Message)]
#[rtype(result = "Result<SessionInfo, AuthError>")]
pub struct StartSession {
    pub user_id: Option<String>,
}

/// True while the session is valid; bumps last activity
#[derive(Message)]
#[rtype(result = "bool")]
pub struct ValidateSession;

/// Record user activity; returns false when there is no valid session
#[derive(Message)]
#[rtype(result = "bool")]
pub struct RecordActivity;

#[derive(Message)]
#[rtype(result = "Result<SessionInfo, AuthError>")]
pub struct RefreshSession;

/// Idempotent; returns true only when a session was actually ended
#[derive(Message)]
#[rtype(result = "bool")]
pub struct EndSession {
    pub reason: EndReason,
}

/// Run one poll now instead of waiting for the interval
#[derive(Message)]
#[rtype(result = "SessionCheck")]
pub struct CheckSession;

#[derive(Message)]
#[rtype(result = "SessionStatus")]
pub struct GetSessionStatus;

/// Tab teardown: stop polling and the actor, leaving the persisted session to other tabs
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

#[derive(Message)]
#[rtype(result = "()")]
pub struct SubscribeSessionEvents {
    pub recipient: Recipient<SessionEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    pub started: usize,
    pub refreshed: usize,
    pub expired: usize,
    pub ended: usize,
    pub validation_failures: usize,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub session: Option<SessionInfo>,
    pub timer_active: bool,
    pub metrics: SessionMetrics,
}

/// Owns the session lifecycle of one tab: expiry polling, proactive refresh and teardown.
pub struct SessionTimerActor {
    config: SessionConfig,
    store: StateStore,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    guard: LoginGuard,
    sync: Option<Recipient<Broadcast>>,
    session: Option<SessionInfo>,
    check_handle: Option<SpawnHandle>,
    listeners: Vec<Recipient<SessionEvent>>,
    metrics: SessionMetrics,
}

impl SessionTimerActor {
    pub fn new(
        config: SessionConfig,
        store: StateStore,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        guard: LoginGuard,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            notifier,
            guard,
            sync: None,
            session: None,
            check_handle: None,
            listeners: Vec::new(),
            metrics: SessionMetrics::default(),
        }
    }

    /// Broadcast session events to other tabs through `sync`
    pub fn with_sync(mut self, sync: Recipient<Broadcast>) -> Self {
        self.sync = Some(sync);
        self
    }

    fn broadcast(&self, payload: SyncPayload) {
        if let Some(sync) = &self.sync {
            sync.do_send(Broadcast::new(payload));
        }
    }

    fn emit(&self, event: SessionEvent) {
        for listener in &self.listeners {
            listener.do_send(event.clone());
        }
    }

    fn start_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.check_handle.take() {
            ctx.cancel_future(handle);
        }

        let handle = ctx.run_interval(self.config.check_interval(), |act, ctx| {
            let outcome = act.check(ctx);
            tracing::trace!(category = LOG_CATEGORY, ?outcome, "Session poll");
        });
        self.check_handle = Some(handle);
    }

    fn stop_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.check_handle.take() {
            ctx.cancel_future(handle);
            tracing::debug!(category = LOG_CATEGORY, "Session timer stopped");
        }
    }

    /// In-memory session, falling back to the persisted one
    fn current(&mut self) -> Result<Option<SessionInfo>, AuthError> {
        if self.session.is_none() {
            self.session = self.store.load_session()?;
        }
        Ok(self.session.clone())
    }

    fn persist(&mut self, session: SessionInfo) -> Result<(), AuthError> {
        self.store.save_session(&session)?;
        self.session = Some(session);
        Ok(())
    }

    fn validate(&mut self) -> bool {
        let session = match self.current() {
            Ok(Some(session)) => session,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(category = LOG_CATEGORY, error = %e, "Session unreadable, treating as invalid");
                return false;
            }
        };

        let uid = session.user_id.clone();
        let now = self.clock.now();

        let blocked = uid.as_deref().is_some_and(|uid| self.guard.is_blocked(uid));
        if blocked || !session.is_valid_at(now) {
            self.metrics.validation_failures += 1;
            if let Some(uid) = uid.as_deref() {
                self.guard.record_failure(uid);
            }
            return false;
        }

        let mut session = session;
        session.touch(now);
        if let Err(e) = self.persist(session) {
            tracing::error!(category = LOG_CATEGORY, error = %e, "Session not persisted, treating as invalid");
            return false;
        }

        if let Some(uid) = uid.as_deref() {
            self.guard.record_success(uid);
        }
        true
    }

    fn refresh(&mut self) -> Result<SessionInfo, AuthError> {
        let mut session = self
            .current()?
            .ok_or_else(|| AuthError::new(AuthErrorCode::SessionExpired, "no active session"))?;

        let now = self.clock.now();
        if !session.is_valid_at(now) {
            return Err(AuthError::new(AuthErrorCode::SessionExpired, "session already expired"));
        }

        session.extend(now, self.config.duration());
        self.persist(session.clone())?;

        self.metrics.refreshed += 1;
        tracing::info!(category = LOG_CATEGORY, session_id = %session.session_id, expires_at = %session.expires_at, "Session refreshed");
        self.emit(SessionEvent::Refreshed(session.clone()));
        Ok(session)
    }

    fn check(&mut self, ctx: &mut Context<Self>) -> SessionCheck {
        let has_session = match self.current() {
            Ok(session) => session.is_some(),
            // Unreadable state counts as a session to tear down
            Err(_) => true,
        };
        if !has_session {
            self.stop_timer(ctx);
            return SessionCheck::NoSession;
        }

        if !self.validate() {
            self.end(EndReason::Expired, ctx);
            return SessionCheck::Expired;
        }

        let within_window = self
            .session
            .as_ref()
            .is_some_and(|s| s.remaining(self.clock.now()) <= self.config.refresh_window());
        if !within_window {
            return SessionCheck::Valid;
        }

        match self.refresh() {
            Ok(_) => SessionCheck::Refreshed,
            Err(e) => {
                tracing::warn!(category = LOG_CATEGORY, error = %e, "Proactive refresh failed");
                self.notifier.warning(e.user_message(), NotificationOptions::toast(SESSION_TOAST));
                SessionCheck::Valid
            }
        }
    }

    fn end(&mut self, reason: EndReason, ctx: &mut Context<Self>) -> bool {
        self.stop_timer(ctx);

        let had_session = self.session.take().is_some() || matches!(self.store.load_session(), Ok(Some(_)));

        for cleared in [self.store.clear_session(), self.store.clear_auth_state()] {
            if let Err(e) = cleared {
                tracing::warn!(category = LOG_CATEGORY, error = %e, "Failed to clear persisted session state");
            }
        }

        if !had_session {
            return false;
        }

        self.metrics.ended += 1;
        tracing::info!(category = LOG_CATEGORY, ?reason, "Session ended");

        match reason {
            EndReason::Expired => {
                self.metrics.expired += 1;
                self.notifier.warning(
                    AuthErrorCode::SessionExpired.user_message(),
                    NotificationOptions::toast(SESSION_TOAST),
                );
                self.broadcast(SyncPayload::SessionExpired);
            }
            EndReason::RefreshFailed => {
                self.notifier.error(
                    AuthErrorCode::SessionExpired.user_message(),
                    NotificationOptions::toast(SESSION_TOAST),
                );
                self.broadcast(SyncPayload::SessionExpired);
            }
            EndReason::Logout => {
                self.notifier.info("Session ended", NotificationOptions::toast(SESSION_TOAST));
                self.broadcast(SyncPayload::SessionLogout);
            }
            EndReason::Remote => {}
        }

        self.emit(SessionEvent::Ended(reason));
        true
    }

    fn adopt_remote_activity(&mut self, last_activity: i64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(remote) = Utc.timestamp_millis_opt(last_activity).single() else {
            return;
        };
        if remote <= session.last_activity {
            return;
        }

        if self.config.refresh_on_activity {
            session.extend(remote, self.config.duration());
        } else {
            session.touch(remote);
        }
        tracing::debug!(category = LOG_CATEGORY, %remote, "Adopted activity from another tab");
    }

    fn adopt_remote_user(&self, user: &UserState) {
        if let Err(e) = self.store.save_auth_state(Some(user)) {
            tracing::warn!(category = LOG_CATEGORY, error = %e, "Failed to persist user from another tab");
        }
    }
}

impl Actor for SessionTimerActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            category = LOG_CATEGORY,
            duration_secs = self.config.duration_secs,
            check_interval_secs = self.config.check_interval_secs,
            "Session timer started"
        );

        // Pick up a session another tab already persisted
        match self.current() {
            Ok(Some(session)) if session.is_valid_at(self.clock.now()) => {
                tracing::info!(category = LOG_CATEGORY, session_id = %session.session_id, "Resuming persisted session");
                self.start_timer(ctx);
            }
            Ok(_) => self.session = None,
            Err(e) => {
                tracing::warn!(category = LOG_CATEGORY, error = %e, "Persisted session unreadable");
                self.session = None;
            }
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            category = LOG_CATEGORY,
            "Session timer stopped. {} sessions started, {} expired",
            self.metrics.started,
            self.metrics.expired
        );
    }
}

impl Handler<StartSession> for SessionTimerActor {
    type Result = Result<SessionInfo, AuthError>;

    fn handle(&mut self, msg: StartSession, ctx: &mut Self::Context) -> Self::Result {
        if let Some(uid) = msg.user_id.as_deref() {
            self.guard.check(uid)?;
        }

        let now = self.clock.now();
        let device_id = self.store.device_id();
        let session = SessionInfo::new(
            create_session_id(&device_id, now.timestamp_millis()),
            device_id,
            msg.user_id,
            now,
            self.config.duration(),
        );

        self.persist(session.clone())?;
        self.start_timer(ctx);
        self.metrics.started += 1;

        tracing::info!(category = LOG_CATEGORY, session_id = %session.session_id, expires_at = %session.expires_at, "Session started");
        self.emit(SessionEvent::Started(session.clone()));
        Ok(session)
    }
}

impl Handler<ValidateSession> for SessionTimerActor {
    type Result = bool;

    fn handle(&mut self, _msg: ValidateSession, _ctx: &mut Self::Context) -> Self::Result {
        self.validate()
    }
}

impl Handler<RecordActivity> for SessionTimerActor {
    type Result = bool;

    fn handle(&mut self, _msg: RecordActivity, _ctx: &mut Self::Context) -> Self::Result {
        let now = self.clock.now();
        let mut session = match self.current() {
            Ok(Some(session)) if session.is_valid_at(now) => session,
            _ => return false,
        };

        if self.config.refresh_on_activity {
            session.extend(now, self.config.duration());
        } else {
            session.touch(now);
        }

        if let Err(e) = self.persist(session) {
            tracing::warn!(category = LOG_CATEGORY, error = %e, "Activity not persisted");
            return false;
        }

        self.broadcast(SyncPayload::SessionActivity {
            last_activity: now.timestamp_millis(),
        });
        true
    }
}

impl Handler<RefreshSession> for SessionTimerActor {
    type Result = Result<SessionInfo, AuthError>;

    fn handle(&mut self, _msg: RefreshSession, _ctx: &mut Self::Context) -> Self::Result {
        self.refresh()
    }
}

impl Handler<EndSession> for SessionTimerActor {
    type Result = bool;

    fn handle(&mut self, msg: EndSession, ctx: &mut Self::Context) -> Self::Result {
        self.end(msg.reason, ctx)
    }
}

impl Handler<CheckSession> for SessionTimerActor {
    type Result = MessageResult<CheckSession>;

    fn handle(&mut self, _msg: CheckSession, ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.check(ctx))
    }
}

impl Handler<GetSessionStatus> for SessionTimerActor {
    type Result = MessageResult<GetSessionStatus>;

    fn handle(&mut self, _msg: GetSessionStatus, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(SessionStatus {
            session: self.session.clone(),
            timer_active: self.check_handle.is_some(),
            metrics: self.metrics.clone(),
        })
    }
}

impl Handler<Shutdown> for SessionTimerActor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        self.stop_timer(ctx);
        self.listeners.clear();
        ctx.stop();
    }
}

impl Handler<SubscribeSessionEvents> for SessionTimerActor {
    type Result = ();

    fn handle(&mut self, msg: SubscribeSessionEvents, _ctx: &mut Self::Context) -> Self::Result {
        self.listeners.push(msg.recipient);
    }
}

// Session events from other tabs
impl Handler<SyncNotification> for SessionTimerActor {
    type Result = ();

    fn handle(&mut self, msg: SyncNotification, ctx: &mut Self::Context) -> Self::Result {
        match msg.0.payload {
            SyncPayload::SessionExpired | SyncPayload::SessionLogout => {
                tracing::info!(category = LOG_CATEGORY, origin = %msg.0.origin_id, "Session ended in another tab");
                self.end(EndReason::Remote, ctx);
            }
            SyncPayload::SessionActivity { last_activity } => self.adopt_remote_activity(last_activity),
            SyncPayload::SessionUpdate(user) => self.adopt_remote_user(&user),
            _ => {}
        }
    }
}
