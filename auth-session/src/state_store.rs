// auth-session/src/state_store.rs
use chrono::Duration;
use common::models::auth::{UserState, WalletState};
use common::models::session::SessionInfo;
use common::storage::{SecureStore, StorageError};
use common::{span_secs, Clock, StorageConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::utils::token::create_device_id;

const LOG_CATEGORY: &str = "StateStore";

const AUTH_KEY: &str = "auth";
const WALLET_KEY: &str = "wallet";
const SESSION_KEY: &str = "session";
const DEVICE_KEY: &str = "device_id";

/// User record kept across reloads, stamped with the login instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAuthState {
    pub user: Option<UserState>,
    pub last_login: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWalletState {
    #[serde(flatten)]
    pub wallet: WalletState,
    pub last_update: i64,
}

/// Persisted auth, wallet and session state shared by every tab of the profile.
#[derive(Debug, Clone)]
pub struct StateStore {
    store: SecureStore,
    clock: Arc<dyn Clock>,
    auth_ttl: Duration,
    wallet_ttl: Duration,
}

impl StateStore {
    pub fn new(store: SecureStore, clock: Arc<dyn Clock>, config: &StorageConfig) -> Self {
        Self {
            store,
            clock,
            auth_ttl: span_secs(config.auth_ttl_secs),
            wallet_ttl: span_secs(config.wallet_ttl_secs),
        }
    }

    /// Persist `user` with the current time as login instant, or clear the entry for `None`
    pub fn save_auth_state(&self, user: Option<&UserState>) -> Result<(), StorageError> {
        match user {
            Some(user) => self.store.save(
                AUTH_KEY,
                &StoredAuthState {
                    user: Some(user.clone()),
                    last_login: self.clock.now_millis(),
                },
            ),
            None => self.clear_auth_state(),
        }
    }

    /// Stored auth state, or `None` when missing, unreadable or older than the auth TTL
    pub fn auth_state(&self) -> Option<StoredAuthState> {
        let state: StoredAuthState = self.store.load_or_none(AUTH_KEY)?;

        if self.clock.now_millis().saturating_sub(state.last_login) > self.auth_ttl.num_milliseconds() {
            tracing::info!(category = LOG_CATEGORY, "Stored auth state expired");
            self.discard(AUTH_KEY);
            return None;
        }
        Some(state)
    }

    /// Stored user when it belongs to `uid`
    pub fn user(&self, uid: &str) -> Option<UserState> {
        self.auth_state()?.user.filter(|user| user.uid == uid)
    }

    pub fn clear_auth_state(&self) -> Result<(), StorageError> {
        self.store.clear(AUTH_KEY)
    }

    /// Apply `update` to the stored wallet (or a blank one) and restamp it
    pub fn update_wallet_state<F>(&self, update: F) -> Result<WalletState, StorageError>
    where
        F: FnOnce(&mut WalletState),
    {
        let now = self.clock.now_millis();
        let mut wallet = self.wallet_state().unwrap_or_else(|| WalletState::disconnected(now));
        update(&mut wallet);

        self.store.save(
            WALLET_KEY,
            &StoredWalletState {
                wallet: wallet.clone(),
                last_update: now,
            },
        )?;
        Ok(wallet)
    }

    pub fn save_wallet_state(&self, wallet: &WalletState) -> Result<(), StorageError> {
        self.update_wallet_state(|stored| *stored = wallet.clone()).map(|_| ())
    }

    /// Stored wallet, or `None` when missing, unreadable or older than the wallet TTL
    pub fn wallet_state(&self) -> Option<WalletState> {
        let stored: StoredWalletState = self.store.load_or_none(WALLET_KEY)?;

        if self.clock.now_millis().saturating_sub(stored.last_update) > self.wallet_ttl.num_milliseconds() {
            tracing::info!(category = LOG_CATEGORY, "Stored wallet state expired");
            self.discard(WALLET_KEY);
            return None;
        }
        Some(stored.wallet)
    }

    pub fn clear_wallet_state(&self) -> Result<(), StorageError> {
        self.store.clear(WALLET_KEY)
    }

    pub fn save_session(&self, session: &SessionInfo) -> Result<(), StorageError> {
        self.store.save(SESSION_KEY, session)
    }

    /// Errors are returned so callers can fail closed
    pub fn load_session(&self) -> Result<Option<SessionInfo>, StorageError> {
        self.store.load(SESSION_KEY)
    }

    pub fn clear_session(&self) -> Result<(), StorageError> {
        self.store.clear(SESSION_KEY)
    }

    /// Device id, generated and persisted on first use
    pub fn device_id(&self) -> String {
        if let Some(id) = self.store.load_or_none::<String>(DEVICE_KEY) {
            return id;
        }

        let id = create_device_id();
        if let Err(e) = self.store.save(DEVICE_KEY, &id) {
            tracing::warn!(category = LOG_CATEGORY, error = %e, "Device id not persisted");
        }
        id
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.store.clear(key) {
            tracing::warn!(category = LOG_CATEGORY, key, error = %e, "Failed to clear expired entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::{KeyValueStore, MemoryStore};
    use common::ManualClock;

    fn store_at(millis: i64) -> (StateStore, Arc<ManualClock>, MemoryStore) {
        let backend = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(millis));
        let config = StorageConfig::default();
        let secure = SecureStore::new(
            Arc::new(backend.clone()),
            Arc::new(common::storage::PassthroughCipher),
            config.key_prefix.clone(),
        );
        (StateStore::new(secure, clock.clone(), &config), clock, backend)
    }

    fn user() -> UserState {
        UserState {
            uid: "uid-1".into(),
            email: Some("a@b.c".into()),
            ..Default::default()
        }
    }

    #[test]
    fn auth_state_expires_after_a_day() {
        let (store, clock, backend) = store_at(1_000);
        store.save_auth_state(Some(&user())).unwrap();
        assert_eq!(store.user("uid-1"), Some(user()));
        assert_eq!(store.user("someone-else"), None);

        clock.advance(Duration::hours(25));
        assert_eq!(store.auth_state(), None);
        assert!(backend.get("tokenforge_auth").unwrap().is_none());
    }

    #[test]
    fn wallet_updates_merge_and_expire_after_an_hour() {
        let (store, clock, _) = store_at(1_000);
        store
            .save_wallet_state(&WalletState::connected("0xabc", 1, 1_000))
            .unwrap();

        let updated = store.update_wallet_state(|w| w.chain_id = Some(137)).unwrap();
        assert_eq!(updated.address.as_deref(), Some("0xabc"));
        assert_eq!(store.wallet_state().and_then(|w| w.chain_id), Some(137));

        clock.advance(Duration::minutes(61));
        assert_eq!(store.wallet_state(), None);
    }

    #[test]
    fn oversized_ttl_keeps_state() {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = StorageConfig {
            auth_ttl_secs: u64::MAX,
            ..StorageConfig::default()
        };
        let secure = SecureStore::plain(Arc::new(MemoryStore::new()));
        let store = StateStore::new(secure, clock.clone(), &config);

        store.save_auth_state(Some(&user())).unwrap();
        clock.advance(Duration::days(3650));
        assert_eq!(store.user("uid-1"), Some(user()));
    }

    #[test]
    fn device_id_is_stable() {
        let (store, _, _) = store_at(0);
        let first = store.device_id();
        assert_eq!(store.device_id(), first);
    }

    #[test]
    fn session_round_trips() {
        let (store, clock, _) = store_at(0);
        let session = SessionInfo::new("s".into(), "d".into(), None, clock.now(), Duration::minutes(30));
        store.save_session(&session).unwrap();
        assert_eq!(store.load_session().unwrap(), Some(session));
        store.clear_session().unwrap();
        assert_eq!(store.load_session().unwrap(), None);
    }
}
