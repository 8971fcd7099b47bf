// auth-session/src/auth_sync.rs
use common::models::auth::{AuthSnapshot, WalletState};
use common::{AuthError, AuthErrorCode, Clock, WalletConfig};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::providers::IdentityProvider;

const LOG_CATEGORY: &str = "AuthSync";
const MIN_SYNC_INTERVAL_MS: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Throttled or already running
    Skipped,
    /// Wallet and auth already agree
    InSync,
    /// Wallet went away while signed in; the user was signed out
    SignedOut,
    /// Wallet is usable for signing in
    WalletVerified { address: String },
}

/// Reconciles wallet connection with the identity provider's auth state.
pub struct AuthSync {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    supported_chain_ids: Vec<u64>,
    in_progress: AtomicBool,
    last_sync: AtomicI64,
}

impl AuthSync {
    pub fn new(provider: Arc<dyn IdentityProvider>, clock: Arc<dyn Clock>, config: &WalletConfig) -> Self {
        Self {
            provider,
            clock,
            supported_chain_ids: config.supported_chain_ids.clone(),
            in_progress: AtomicBool::new(false),
            last_sync: AtomicI64::new(i64::MIN),
        }
    }

    pub async fn synchronize(&self, wallet: &WalletState, auth: &AuthSnapshot) -> Result<SyncOutcome, AuthError> {
        let now = self.clock.now_millis();
        if now.saturating_sub(self.last_sync.load(Ordering::SeqCst)) < MIN_SYNC_INTERVAL_MS {
            return Ok(SyncOutcome::Skipped);
        }
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Ok(SyncOutcome::Skipped);
        }
        self.last_sync.store(now, Ordering::SeqCst);

        let outcome = self.reconcile(wallet, auth).await;
        self.in_progress.store(false, Ordering::SeqCst);

        if let Err(e) = &outcome {
            tracing::error!(category = LOG_CATEGORY, error = %e, "Synchronization failed");
        }
        outcome
    }

    async fn reconcile(&self, wallet: &WalletState, auth: &AuthSnapshot) -> Result<SyncOutcome, AuthError> {
        tracing::debug!(
            category = LOG_CATEGORY,
            wallet_connected = wallet.is_connected,
            authenticated = auth.is_authenticated,
            "Starting synchronization"
        );

        match (wallet.is_connected, auth.is_authenticated) {
            (false, true) => {
                tracing::info!(category = LOG_CATEGORY, "Wallet disconnected, signing out");
                self.provider.sign_out().await?;
                Ok(SyncOutcome::SignedOut)
            }
            (true, false) => {
                let supported = wallet
                    .chain_id
                    .is_some_and(|chain_id| self.supported_chain_ids.contains(&chain_id));
                if !supported {
                    return Err(AuthError::new(
                        AuthErrorCode::NetworkMismatch,
                        format!("please connect to a supported network (got {:?})", wallet.chain_id),
                    ));
                }

                let address = wallet
                    .address
                    .clone()
                    .ok_or_else(|| AuthError::new(AuthErrorCode::WalletNotFound, "no wallet address found"))?;

                tracing::info!(category = LOG_CATEGORY, %address, "Wallet ready for authentication");
                Ok(SyncOutcome::WalletVerified { address })
            }
            _ => Ok(SyncOutcome::InSync),
        }
    }
}

impl std::fmt::Debug for AuthSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSync")
            .field("supported_chain_ids", &self.supported_chain_ids)
            .field("in_progress", &self.in_progress.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
