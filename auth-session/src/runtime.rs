// auth-session/src/runtime.rs
use actix::{Actor, Addr, MailboxError};
use common::models::auth::AuthSnapshot;
use common::models::session::SessionInfo;
use common::storage::{Cipher, KeyValueStore, MemoryStore, PassthroughCipher, SecureStore};
use common::{new_tab_id, AuthError, AuthErrorCode, Clock, Config, LogNotifier, NotificationSink, SystemClock};
use std::sync::Arc;
use tab_sync::{subscribe, Close, LocalBus, Subscription, TabSyncActor};
use tokio::task::JoinHandle;

use crate::actors::auth_state::{AuthStateActor, GetAuthSnapshot, SetUser};
use crate::actors::session_timer::{
    EndReason, EndSession, RecordActivity, SessionTimerActor, Shutdown, StartSession,
};
use crate::auth_sync::{AuthSync, SyncOutcome};
use crate::lockout::LoginGuard;
use crate::providers::{IdentityProvider, WalletBridge};
use crate::retry::RetryConfig;
use crate::state_store::StateStore;
use crate::token_service::TokenService;
use crate::wallet_reconnection::WalletReconnectionService;

const LOG_CATEGORY: &str = "TabRuntime";

/// Resources shared by every tab of one browser profile
#[derive(Clone)]
pub struct SharedResources {
    pub bus: Arc<LocalBus>,
    pub store: Arc<dyn KeyValueStore>,
    pub cipher: Arc<dyn Cipher>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl SharedResources {
    pub fn new(config: &Config) -> Self {
        Self {
            bus: Arc::new(LocalBus::new(config.sync.bus_capacity)),
            store: Arc::new(MemoryStore::new()),
            cipher: Arc::new(PassthroughCipher),
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }
}

fn mailbox(e: MailboxError) -> AuthError {
    AuthError::new(AuthErrorCode::InternalError, format!("actor unavailable: {}", e))
}

/// The pieces torn down when this tab's user goes away
#[derive(Clone)]
struct LocalAuth {
    token_service: TokenService,
    session_timer: Addr<SessionTimerActor>,
    auth_state: Addr<AuthStateActor>,
}

impl LocalAuth {
    async fn end(&self) -> Result<(), AuthError> {
        self.token_service.cleanup();
        self.session_timer
            .send(EndSession {
                reason: EndReason::Logout,
            })
            .await
            .map_err(mailbox)?;
        self.auth_state.send(SetUser { user: None }).await.map_err(mailbox)?;
        Ok(())
    }

    /// End local auth whenever the provider drops its user, whoever signed out
    fn watch(self, provider: &Arc<dyn IdentityProvider>) -> JoinHandle<()> {
        let mut changes = provider.on_auth_state_changed();
        let mut signed_in = changes.borrow_and_update().is_some();

        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let now_signed_in = changes.borrow_and_update().is_some();
                if signed_in && !now_signed_in {
                    tracing::info!(category = LOG_CATEGORY, "Provider signed out, ending local auth");
                    if let Err(e) = self.end().await {
                        tracing::warn!(category = LOG_CATEGORY, error = %e, "Failed to end local auth");
                    }
                }
                signed_in = now_signed_in;
            }
        })
    }
}

/// Everything one tab runs, built explicitly and torn down by [`shutdown`](Self::shutdown).
pub struct TabRuntime {
    tab_id: String,
    provider: Arc<dyn IdentityProvider>,
    tab_sync: Addr<TabSyncActor>,
    session_timer: Addr<SessionTimerActor>,
    auth_state: Addr<AuthStateActor>,
    token_service: TokenService,
    wallet: WalletReconnectionService,
    auth_sync: AuthSync,
    local: LocalAuth,
    auth_watch: JoinHandle<()>,
    subscriptions: Vec<Subscription>,
}

impl TabRuntime {
    pub async fn start(
        config: &Config,
        shared: &SharedResources,
        provider: Arc<dyn IdentityProvider>,
        bridge: Arc<dyn WalletBridge>,
    ) -> Result<Self, AuthError> {
        let tab_id = new_tab_id();
        let clock = shared.clock.clone();
        let notifier = shared.notifier.clone();

        let secure = SecureStore::new(shared.store.clone(), shared.cipher.clone(), config.storage.key_prefix.clone());
        let store = StateStore::new(secure, clock.clone(), &config.storage);

        let tab_sync = TabSyncActor::new(tab_id.clone(), shared.bus.clone(), &config.sync, clock.clone()).start();

        let guard = LoginGuard::new(&config.lockout, clock.clone(), notifier.clone());
        let session_timer = SessionTimerActor::new(
            config.session.clone(),
            store.clone(),
            clock.clone(),
            notifier.clone(),
            guard,
        )
        .with_sync(tab_sync.clone().recipient())
        .start();

        let wallet = WalletReconnectionService::new(
            bridge,
            store.clone(),
            clock.clone(),
            notifier.clone(),
            config.wallet.clone(),
            RetryConfig::from(&config.retry),
        )
        .with_sync(tab_sync.clone().recipient());
        wallet.watch_chain_changes();

        let auth_state = AuthStateActor::new(store)
            .with_sync(tab_sync.clone().recipient())
            .with_wallet(wallet.clone())
            .start();

        let token_service = TokenService::with_session(
            provider.clone(),
            clock.clone(),
            notifier,
            config.token.clone(),
            RetryConfig::from(&config.retry),
            session_timer.clone().recipient(),
        );

        let subscriptions = vec![
            subscribe(&tab_sync, session_timer.clone().recipient())
                .await
                .map_err(mailbox)?,
            subscribe(&tab_sync, auth_state.clone().recipient())
                .await
                .map_err(mailbox)?,
        ];

        let local = LocalAuth {
            token_service: token_service.clone(),
            session_timer: session_timer.clone(),
            auth_state: auth_state.clone(),
        };
        let auth_watch = local.clone().watch(&provider);

        tracing::info!(category = LOG_CATEGORY, %tab_id, "Tab runtime started");

        Ok(Self {
            tab_id,
            auth_sync: AuthSync::new(provider.clone(), clock, &config.wallet),
            provider,
            tab_sync,
            session_timer,
            auth_state,
            token_service,
            wallet,
            local,
            auth_watch,
            subscriptions,
        })
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn tab_sync(&self) -> &Addr<TabSyncActor> {
        &self.tab_sync
    }

    pub fn session_timer(&self) -> &Addr<SessionTimerActor> {
        &self.session_timer
    }

    pub fn token_service(&self) -> &TokenService {
        &self.token_service
    }

    pub fn wallet(&self) -> &WalletReconnectionService {
        &self.wallet
    }

    /// Sign in, fetch a token, start the session and tell the other tabs
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionInfo, AuthError> {
        let user = self.provider.sign_in(email, password).await?;

        let session = self
            .session_timer
            .send(StartSession {
                user_id: Some(user.uid.clone()),
            })
            .await
            .map_err(mailbox)??;

        if let Err(e) = self.token_service.initialize(Some(user.clone())).await {
            self.session_timer
                .send(EndSession {
                    reason: EndReason::RefreshFailed,
                })
                .await
                .map_err(mailbox)?;
            return Err(e);
        }

        self.auth_state
            .send(SetUser { user: Some(user) })
            .await
            .map_err(mailbox)?;
        Ok(session)
    }

    /// Sign out everywhere; the stored wallet is forgotten as well
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.provider.sign_out().await?;
        self.wallet.forget();
        self.end_local_auth().await
    }

    async fn end_local_auth(&self) -> Result<(), AuthError> {
        self.local.end().await
    }

    pub async fn record_activity(&self) -> Result<bool, AuthError> {
        self.session_timer.send(RecordActivity).await.map_err(mailbox)
    }

    /// Auth picture of this tab; the wallet service is authoritative for the wallet
    pub async fn snapshot(&self) -> Result<AuthSnapshot, AuthError> {
        let mut snapshot = self.auth_state.send(GetAuthSnapshot).await.map_err(mailbox)?;
        snapshot.wallet = Some(self.wallet.wallet_state());
        Ok(snapshot)
    }

    /// Bring auth in line with the wallet
    pub async fn reconcile(&self) -> Result<SyncOutcome, AuthError> {
        let snapshot = self.snapshot().await?;
        let wallet = self.wallet.wallet_state();

        let outcome = self.auth_sync.synchronize(&wallet, &snapshot).await?;
        if outcome == SyncOutcome::SignedOut {
            self.end_local_auth().await?;
        }
        Ok(outcome)
    }

    /// Tear the tab down: stop timers, drop subscriptions and close the sync channel
    pub async fn shutdown(self) {
        tracing::info!(category = LOG_CATEGORY, tab_id = %self.tab_id, "Shutting down tab runtime");

        self.auth_watch.abort();
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.wallet.stop();
        self.token_service.cleanup();

        // Teardown is best-effort; a stopped actor is already torn down
        let _ = self.session_timer.send(Shutdown).await;
        let _ = self.tab_sync.send(Close).await;
    }
}

impl std::fmt::Debug for TabRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabRuntime")
            .field("tab_id", &self.tab_id)
            .finish_non_exhaustive()
    }
}
