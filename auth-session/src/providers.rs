// auth-session/src/providers.rs
//! External collaborators: the identity provider and the wallet bridge.
//!
//! Both are traits so the services can be driven by the real SDK bindings or by the
//! in-memory implementations below, which back the demo binary and the tests.
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::models::auth::UserState;
use common::{AuthError, AuthErrorCode, Clock};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<UserState, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Current id token, minting a new one when `force_refresh` is set
    async fn get_token(&self, force_refresh: bool) -> Result<String, AuthError>;

    /// Expiry of the token last returned by [`get_token`](Self::get_token)
    async fn token_expiration(&self) -> Result<DateTime<Utc>, AuthError>;

    fn current_user(&self) -> Option<UserState>;

    /// Auth state stream; the receiver always holds the latest user
    fn on_auth_state_changed(&self) -> watch::Receiver<Option<UserState>>;
}

#[async_trait]
pub trait WalletBridge: Send + Sync {
    async fn request_addresses(&self) -> Result<Vec<String>, AuthError>;

    async fn get_chain_id(&self) -> Result<u64, AuthError>;

    fn chain_changes(&self) -> broadcast::Receiver<u64>;
}

struct Account {
    password: String,
    user: UserState,
}

/// Identity provider holding accounts in memory.
pub struct InMemoryIdentityProvider {
    clock: Arc<dyn Clock>,
    accounts: DashMap<String, Account>,
    token_lifetime: Duration,
    issued: AtomicU64,
    token: Mutex<Option<(String, DateTime<Utc>)>>,
    failures: Mutex<Option<(u32, AuthErrorCode)>>,
    state_tx: watch::Sender<Option<UserState>>,
}

impl InMemoryIdentityProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (state_tx, _) = watch::channel(None);
        Self {
            clock,
            accounts: DashMap::new(),
            token_lifetime: Duration::hours(1),
            issued: AtomicU64::new(0),
            token: Mutex::new(None),
            failures: Mutex::new(None),
            state_tx,
        }
    }

    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    pub fn add_account(&self, email: &str, password: &str, user: UserState) {
        self.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user,
            },
        );
    }

    /// Make the next `count` token requests fail with `code`
    pub fn fail_next_token_requests(&self, count: u32, code: AuthErrorCode) {
        *self.failures.lock().unwrap_or_else(|e| e.into_inner()) = Some((count, code));
    }

    /// Number of tokens minted so far
    pub fn tokens_issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<AuthErrorCode> {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match failures.as_mut() {
            Some((remaining, code)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*code)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<UserState, AuthError> {
        let account = self
            .accounts
            .get(email)
            .ok_or_else(|| AuthError::new(AuthErrorCode::UserNotFound, format!("no account for {}", email)))?;

        if account.password != password {
            return Err(AuthError::new(AuthErrorCode::InvalidSignature, "wrong password"));
        }

        let mut user = account.user.clone();
        user.last_login_time = Some(self.clock.now_millis());
        self.state_tx.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.state_tx.send_replace(None);
        Ok(())
    }

    async fn get_token(&self, force_refresh: bool) -> Result<String, AuthError> {
        if self.state_tx.borrow().is_none() {
            return Err(AuthError::new(AuthErrorCode::SessionExpired, "no signed-in user"));
        }
        if let Some(code) = self.take_failure() {
            return Err(AuthError::new(code, "token request failed"));
        }

        let now = self.clock.now();
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        match token.as_ref() {
            Some((value, expires_at)) if !force_refresh && *expires_at > now => Ok(value.clone()),
            _ => {
                let serial = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
                let value = format!("id-token-{}", serial);
                *token = Some((value.clone(), now + self.token_lifetime));
                Ok(value)
            }
        }
    }

    async fn token_expiration(&self) -> Result<DateTime<Utc>, AuthError> {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(_, expires_at)| *expires_at)
            .ok_or_else(|| AuthError::new(AuthErrorCode::SessionExpired, "no token issued"))
    }

    fn current_user(&self) -> Option<UserState> {
        self.state_tx.borrow().clone()
    }

    fn on_auth_state_changed(&self) -> watch::Receiver<Option<UserState>> {
        self.state_tx.subscribe()
    }
}

/// Wallet bridge with a settable account list and chain.
pub struct InMemoryWallet {
    addresses: Mutex<Vec<String>>,
    chain_id: AtomicU64,
    failures: AtomicU32,
    chain_tx: broadcast::Sender<u64>,
}

impl InMemoryWallet {
    pub fn new(address: impl Into<String>, chain_id: u64) -> Self {
        let (chain_tx, _) = broadcast::channel(16);
        Self {
            addresses: Mutex::new(vec![address.into()]),
            chain_id: AtomicU64::new(chain_id),
            failures: AtomicU32::new(0),
            chain_tx,
        }
    }

    /// Make the next `count` address requests fail with a network error
    pub fn fail_next_requests(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn set_addresses(&self, addresses: Vec<String>) {
        *self.addresses.lock().unwrap_or_else(|e| e.into_inner()) = addresses;
    }

    /// Switch network and emit a chain-change event
    pub fn switch_chain(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::SeqCst);
        // No listeners is fine
        let _ = self.chain_tx.send(chain_id);
    }
}

#[async_trait]
impl WalletBridge for InMemoryWallet {
    async fn request_addresses(&self) -> Result<Vec<String>, AuthError> {
        let consumed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(AuthError::new(AuthErrorCode::NetworkRequestFailed, "wallet RPC unavailable"));
        }
        Ok(self.addresses.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn get_chain_id(&self) -> Result<u64, AuthError> {
        Ok(self.chain_id.load(Ordering::SeqCst))
    }

    fn chain_changes(&self) -> broadcast::Receiver<u64> {
        self.chain_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ManualClock;

    fn provider() -> InMemoryIdentityProvider {
        let provider = InMemoryIdentityProvider::new(Arc::new(ManualClock::new(5_000)));
        provider.add_account(
            "a@b.c",
            "pw",
            UserState {
                uid: "uid-1".into(),
                ..Default::default()
            },
        );
        provider
    }

    #[tokio::test]
    async fn sign_in_publishes_user_and_stamps_login() {
        let provider = provider();
        let mut changes = provider.on_auth_state_changed();

        let user = provider.sign_in("a@b.c", "pw").await.unwrap();
        assert_eq!(user.last_login_time, Some(5_000));
        assert!(changes.has_changed().unwrap());
        assert_eq!(changes.borrow_and_update().as_ref().map(|u| u.uid.clone()), Some("uid-1".into()));

        let err = provider.sign_in("a@b.c", "nope").await.unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::InvalidSignature);
    }

    #[tokio::test]
    async fn forced_refresh_mints_new_token() {
        let provider = provider();
        provider.sign_in("a@b.c", "pw").await.unwrap();

        let first = provider.get_token(false).await.unwrap();
        assert_eq!(provider.get_token(false).await.unwrap(), first);
        assert_ne!(provider.get_token(true).await.unwrap(), first);
        assert_eq!(provider.tokens_issued(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let provider = provider();
        provider.sign_in("a@b.c", "pw").await.unwrap();
        provider.fail_next_token_requests(1, AuthErrorCode::NetworkRequestFailed);

        assert!(provider.get_token(true).await.is_err());
        assert!(provider.get_token(true).await.is_ok());
    }

    #[tokio::test]
    async fn wallet_emits_chain_changes() {
        let wallet = InMemoryWallet::new("0xABC", 1);
        let mut changes = wallet.chain_changes();

        wallet.switch_chain(137);
        assert_eq!(changes.recv().await.unwrap(), 137);
        assert_eq!(wallet.get_chain_id().await.unwrap(), 137);

        wallet.fail_next_requests(1);
        assert!(wallet.request_addresses().await.is_err());
        assert_eq!(wallet.request_addresses().await.unwrap(), vec!["0xABC".to_string()]);
    }
}
