// auth-session/src/wallet_reconnection.rs
use actix::Recipient;
use common::models::auth::WalletState;
use common::{AuthError, AuthErrorCode, Clock, NotificationOptions, NotificationSink, SyncPayload, WalletConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tab_sync::Broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::providers::WalletBridge;
use crate::retry::{retry_with_timeout, RetryConfig};
use crate::state_store::StateStore;

const LOG_CATEGORY: &str = "WalletReconnection";

/// Counters for reconnection attempts made by this tab
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconnectionMetrics {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub average_duration_ms: f64,
    pub last_attempt: Option<i64>,
    pub network_changes: u32,
}

impl ReconnectionMetrics {
    fn record(&mut self, success: bool, duration_ms: f64, at: i64) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.average_duration_ms += (duration_ms - self.average_duration_ms) / self.attempts as f64;
        self.last_attempt = Some(at);
    }
}

struct Inner {
    bridge: Arc<dyn WalletBridge>,
    store: StateStore,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    sync: Option<Recipient<Broadcast>>,
    config: WalletConfig,
    retry: RetryConfig,
    reconnecting: AtomicBool,
    state: Mutex<WalletState>,
    metrics: Mutex<ReconnectionMetrics>,
    chain_task: Mutex<Option<JoinHandle<()>>>,
}

// Clears the in-progress flag however the reconnection ends
struct ReconnectingGuard<'a>(&'a AtomicBool);

impl Drop for ReconnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Restores a previously connected wallet and keeps its network in sync across tabs.
#[derive(Clone)]
pub struct WalletReconnectionService {
    inner: Arc<Inner>,
}

impl WalletReconnectionService {
    pub fn new(
        bridge: Arc<dyn WalletBridge>,
        store: StateStore,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        config: WalletConfig,
        retry: RetryConfig,
    ) -> Self {
        let now = clock.now_millis();
        Self {
            inner: Arc::new(Inner {
                bridge,
                store,
                clock,
                notifier,
                sync: None,
                config,
                retry: retry.with_metadata("service", LOG_CATEGORY),
                reconnecting: AtomicBool::new(false),
                state: Mutex::new(WalletState::disconnected(now)),
                metrics: Mutex::new(ReconnectionMetrics::default()),
                chain_task: Mutex::new(None),
            }),
        }
    }

    /// Broadcast wallet changes to other tabs through `sync`. Call before cloning.
    pub fn with_sync(mut self, sync: Recipient<Broadcast>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.sync = Some(sync);
        } else {
            tracing::warn!(category = LOG_CATEGORY, "Service already shared, sync recipient ignored");
        }
        self
    }

    pub fn wallet_state(&self) -> WalletState {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn metrics(&self) -> ReconnectionMetrics {
        self.inner.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::SeqCst)
    }

    pub fn is_supported_chain(&self, chain_id: u64) -> bool {
        self.inner.config.supported_chain_ids.contains(&chain_id)
    }

    pub fn is_correct_network(&self, chain_id: u64) -> bool {
        chain_id == self.inner.config.expected_chain_id
    }

    /// Reconnect to `expected_address`, or to the address persisted by a previous session.
    ///
    /// Returns false without doing anything while another reconnection is running.
    pub async fn reconnect(&self, expected_address: Option<&str>) -> bool {
        let inner = &self.inner;
        if inner.reconnecting.swap(true, Ordering::SeqCst) {
            tracing::debug!(category = LOG_CATEGORY, "Reconnection already in progress");
            inner
                .notifier
                .info("Wallet reconnection already in progress", NotificationOptions::toast("reconnect-in-progress"));
            return false;
        }
        let _guard = ReconnectingGuard(&inner.reconnecting);

        let address = match expected_address {
            Some(address) => Some(address.to_string()),
            None => inner.store.wallet_state().and_then(|w| w.address),
        };
        let Some(address) = address else {
            tracing::debug!(category = LOG_CATEGORY, "No stored wallet to reconnect");
            inner
                .notifier
                .error("No wallet connected", NotificationOptions::toast("no-wallet-connected"));
            return false;
        };

        let started = Instant::now();
        let result = retry_with_timeout(
            || self.connect_attempt(&address),
            &inner.retry,
            "wallet reconnection",
            inner.notifier.as_ref(),
        )
        .await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let success = match result.into_result() {
            Ok(chain_id) => {
                self.handle_connection(&address, chain_id);
                inner
                    .notifier
                    .success("Wallet reconnected", NotificationOptions::toast("reconnect-result"));
                true
            }
            Err(e) => {
                tracing::error!(category = LOG_CATEGORY, error = %e, "Reconnection failed");
                self.handle_disconnection();
                inner
                    .notifier
                    .error("Wallet reconnection failed", NotificationOptions::toast("reconnect-result"));
                false
            }
        };

        inner
            .metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(success, duration_ms, inner.clock.now_millis());
        success
    }

    async fn connect_attempt(&self, expected: &str) -> Result<u64, AuthError> {
        let bridge = &self.inner.bridge;

        let addresses = bridge.request_addresses().await?;
        let Some(connected) = addresses.first() else {
            return Err(AuthError::new(AuthErrorCode::WalletNotFound, "no accounts exposed by the wallet"));
        };

        let chain_id = bridge.get_chain_id().await?;
        if !self.is_supported_chain(chain_id) {
            return Err(AuthError::new(
                AuthErrorCode::NetworkMismatch,
                format!("unsupported network: {}", chain_id),
            ));
        }

        if !connected.eq_ignore_ascii_case(expected) {
            return Err(AuthError::new(
                AuthErrorCode::InvalidSignature,
                "connected address does not match expected address",
            ));
        }

        Ok(chain_id)
    }

    fn handle_connection(&self, address: &str, chain_id: u64) {
        let wallet = WalletState::connected(address, chain_id, self.inner.clock.now_millis());
        tracing::info!(category = LOG_CATEGORY, address, chain_id, "Wallet connected");
        self.commit(wallet.clone());
        self.broadcast(SyncPayload::WalletConnect(Some(wallet)));
    }

    fn handle_disconnection(&self) {
        let wallet = WalletState::disconnected(self.inner.clock.now_millis());
        self.commit(wallet);
        self.broadcast(SyncPayload::WalletDisconnect);
    }

    pub fn disconnect(&self) {
        tracing::info!(category = LOG_CATEGORY, "Wallet disconnected");
        self.handle_disconnection();
    }

    /// Disconnect and drop the stored wallet so no later load reconnects it
    pub fn forget(&self) {
        if let Err(e) = self.inner.store.clear_wallet_state() {
            tracing::warn!(category = LOG_CATEGORY, error = %e, "Stored wallet not cleared");
        }
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) =
            WalletState::disconnected(self.inner.clock.now_millis());
        tracing::info!(category = LOG_CATEGORY, "Wallet forgotten");
        self.broadcast(SyncPayload::WalletDisconnect);
    }

    fn commit(&self, wallet: WalletState) {
        if let Err(e) = self.inner.store.save_wallet_state(&wallet) {
            tracing::warn!(category = LOG_CATEGORY, error = %e, "Wallet state not persisted");
        }
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) = wallet;
    }

    fn broadcast(&self, payload: SyncPayload) {
        if let Some(sync) = &self.inner.sync {
            sync.do_send(Broadcast::new(payload));
        }
    }

    /// Apply a chain switch reported by the wallet
    pub fn handle_network_change(&self, chain_id: u64) {
        let previous = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            let previous = state.chain_id.replace(chain_id);
            state.timestamp = self.inner.clock.now_millis();
            previous
        };
        if previous == Some(chain_id) {
            return;
        }

        tracing::info!(category = LOG_CATEGORY, ?previous, chain_id, "Network changed");
        self.inner.metrics.lock().unwrap_or_else(|e| e.into_inner()).network_changes += 1;

        if let Err(e) = self.inner.store.update_wallet_state(|w| w.chain_id = Some(chain_id)) {
            tracing::warn!(category = LOG_CATEGORY, error = %e, "Network change not persisted");
        }

        if !self.is_supported_chain(chain_id) {
            self.inner.notifier.warning(
                AuthErrorCode::NetworkMismatch.user_message(),
                NotificationOptions::toast(format!("network-change-{}", chain_id)),
            );
        } else if !self.is_correct_network(chain_id) {
            self.inner.notifier.info(
                &format!("Connected to network {}, expected {}", chain_id, self.inner.config.expected_chain_id),
                NotificationOptions::toast(format!("network-change-{}", chain_id)),
            );
        }

        self.broadcast(SyncPayload::NetworkChange { chain_id });
    }

    /// Adopt wallet state resolved from another tab without re-broadcasting it
    pub fn apply_remote(&self, payload: &SyncPayload) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match payload {
            SyncPayload::WalletConnect(Some(wallet)) => *state = wallet.clone(),
            SyncPayload::WalletConnect(None) | SyncPayload::WalletDisconnect => {
                *state = WalletState::disconnected(self.inner.clock.now_millis());
            }
            SyncPayload::NetworkChange { chain_id } => state.chain_id = Some(*chain_id),
            _ => {}
        }
    }

    /// Follow chain-change events from the wallet bridge until [`stop`](Self::stop)
    pub fn watch_chain_changes(&self) {
        let mut changes = self.inner.bridge.chain_changes();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            loop {
                let chain_id = match changes.recv().await {
                    Ok(chain_id) => chain_id,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(category = LOG_CATEGORY, skipped, "Chain change events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                WalletReconnectionService { inner }.handle_network_change(chain_id);
            }
        });

        if let Some(previous) = self.inner.chain_task.lock().unwrap_or_else(|e| e.into_inner()).replace(task) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.inner.chain_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for WalletReconnectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletReconnectionService")
            .field("state", &self.wallet_state())
            .field("reconnecting", &self.is_reconnecting())
            .finish_non_exhaustive()
    }
}
