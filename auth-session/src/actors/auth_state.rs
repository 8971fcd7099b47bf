// auth-session/src/actors/auth_state.rs
use actix::{Actor, Context, Handler, Message, MessageResult, Recipient};
use common::models::auth::{AuthSnapshot, UserState, WalletState};
use common::SyncPayload;
use tab_sync::{Broadcast, SyncNotification};

use crate::state_store::StateStore;
use crate::wallet_reconnection::WalletReconnectionService;

const LOG_CATEGORY: &str = "AuthState";

/// Local sign-in (`Some`) or sign-out (`None`), announced to other tabs
#[derive(Debug, Message)]
#[rtype(result = "()")]
pub struct SetUser {
    pub user: Option<UserState>,
}

#[derive(Debug, Message)]
#[rtype(result = "AuthSnapshot")]
pub struct GetAuthSnapshot;

/// Auth picture of one tab, kept in step with the other tabs.
pub struct AuthStateActor {
    snapshot: AuthSnapshot,
    store: StateStore,
    sync: Option<Recipient<Broadcast>>,
    wallet: Option<WalletReconnectionService>,
}

impl AuthStateActor {
    pub fn new(store: StateStore) -> Self {
        Self {
            snapshot: AuthSnapshot::default(),
            store,
            sync: None,
            wallet: None,
        }
    }

    pub fn with_sync(mut self, sync: Recipient<Broadcast>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Forward remote wallet changes into `wallet`
    pub fn with_wallet(mut self, wallet: WalletReconnectionService) -> Self {
        self.wallet = Some(wallet);
        self
    }

    fn broadcast(&self, payload: SyncPayload) {
        if let Some(sync) = &self.sync {
            sync.do_send(Broadcast::new(payload));
        }
    }

    fn set_user(&mut self, user: Option<UserState>) {
        self.snapshot.is_authenticated = user.is_some();
        self.snapshot.user = user;
    }

    fn wallet_or_default(&mut self) -> &mut WalletState {
        self.snapshot
            .wallet
            .get_or_insert_with(|| WalletState::disconnected(0))
    }
}

impl Actor for AuthStateActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        // Restore what the profile remembers from a previous load
        if let Some(stored) = self.store.auth_state() {
            self.set_user(stored.user);
        }
        self.snapshot.wallet = self.store.wallet_state();

        tracing::info!(
            category = LOG_CATEGORY,
            authenticated = self.snapshot.is_authenticated,
            wallet = self.snapshot.wallet.as_ref().is_some_and(|w| w.is_connected),
            "Auth state restored"
        );
    }
}

impl Handler<SetUser> for AuthStateActor {
    type Result = ();

    fn handle(&mut self, msg: SetUser, _ctx: &mut Self::Context) -> Self::Result {
        if let Err(e) = self.store.save_auth_state(msg.user.as_ref()) {
            tracing::warn!(category = LOG_CATEGORY, error = %e, "Auth state not persisted");
        }

        self.set_user(msg.user.clone());
        // Sign-out travels as SESSION_LOGOUT plus the snapshot; a bare UPDATE_USER(None)
        // would be merged with the user other tabs still cache
        if let Some(user) = msg.user {
            self.broadcast(SyncPayload::UpdateUser(Some(user)));
        }
        self.broadcast(SyncPayload::AuthStateChange(self.snapshot.clone()));
    }
}

impl Handler<GetAuthSnapshot> for AuthStateActor {
    type Result = MessageResult<GetAuthSnapshot>;

    fn handle(&mut self, _msg: GetAuthSnapshot, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.snapshot.clone())
    }
}

impl Handler<SyncNotification> for AuthStateActor {
    type Result = ();

    fn handle(&mut self, msg: SyncNotification, _ctx: &mut Self::Context) -> Self::Result {
        let payload = msg.0.payload;

        if let Some(wallet) = &self.wallet {
            wallet.apply_remote(&payload);
        }

        match payload {
            SyncPayload::UpdateUser(user) => self.set_user(user),
            SyncPayload::SessionUpdate(user) => self.set_user(Some(user)),
            SyncPayload::SessionExpired | SyncPayload::SessionLogout => self.set_user(None),
            SyncPayload::AuthStateChange(snapshot) => {
                self.snapshot.is_authenticated = snapshot.is_authenticated;
                self.snapshot.user = snapshot.user;
                if snapshot.wallet.is_some() {
                    self.snapshot.wallet = snapshot.wallet;
                }
            }
            SyncPayload::WalletConnect(Some(wallet)) => self.snapshot.wallet = Some(wallet),
            SyncPayload::WalletConnect(None) | SyncPayload::WalletDisconnect => {
                let wallet = self.wallet_or_default();
                wallet.is_connected = false;
                wallet.address = None;
                wallet.chain_id = None;
            }
            SyncPayload::NetworkChange { chain_id } => {
                self.wallet_or_default().chain_id = Some(chain_id);
            }
            SyncPayload::SessionActivity { .. } => {}
        }

        tracing::debug!(
            category = LOG_CATEGORY,
            origin = %msg.0.origin_id,
            authenticated = self.snapshot.is_authenticated,
            "Applied auth state from another tab"
        );
    }
}
