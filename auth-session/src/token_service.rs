// auth-session/src/token_service.rs
use actix::Recipient;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::models::auth::UserState;
use common::{
    span_secs, AuthError, AuthErrorCode, Clock, NotificationOptions, NotificationSink, TokenConfig,
    DEFAULT_RETRYABLE_CODES, MAX_SPAN_SECS,
};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::actors::session_timer::{EndReason, EndSession};
use crate::providers::IdentityProvider;
use crate::retry::{with_retry, with_timeout, RetryConfig};

const LOG_CATEGORY: &str = "TokenService";
const TOKEN_TOAST: &str = "token-refresh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    config: TokenConfig,
    retry: RetryConfig,
    session: Option<Recipient<EndSession>>,
    user: Mutex<Option<UserState>>,
    token: Mutex<Option<TokenInfo>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps a fresh id token for the signed-in user and refreshes it on a fixed cadence.
///
/// Cloning shares the same token and timer.
#[derive(Clone)]
pub struct TokenService {
    inner: Arc<Inner>,
}

impl TokenService {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        config: TokenConfig,
        retry: RetryConfig,
    ) -> Self {
        Self::build(provider, clock, notifier, config, retry, None)
    }

    /// Like [`new`](Self::new), ending the session through `session` when periodic refresh fails
    pub fn with_session(
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        config: TokenConfig,
        retry: RetryConfig,
        session: Recipient<EndSession>,
    ) -> Self {
        Self::build(provider, clock, notifier, config, retry, Some(session))
    }

    fn build(
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        config: TokenConfig,
        retry: RetryConfig,
        session: Option<Recipient<EndSession>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                clock,
                notifier,
                config,
                retry: retry.with_metadata("service", LOG_CATEGORY),
                session,
                user: Mutex::new(None),
                token: Mutex::new(None),
                refresh_task: Mutex::new(None),
            }),
        }
    }

    /// Start tracking `user`: fetch a token and start the refresh timer. `None` tears down.
    pub async fn initialize(&self, user: Option<UserState>) -> Result<(), AuthError> {
        tracing::info!(category = LOG_CATEGORY, user = ?user.as_ref().map(|u| &u.uid), "Initializing token service");

        let signed_in = user.is_some();
        *self.inner.user.lock().unwrap_or_else(|e| e.into_inner()) = user;

        if !signed_in {
            self.stop_refresh_timer();
            *self.inner.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
            return Ok(());
        }

        self.refresh().await?;
        self.start_refresh_timer();
        Ok(())
    }

    /// Force a new token from the provider.
    ///
    /// Transient failures are retried; anything left over surfaces as `session-expired`.
    pub async fn refresh(&self) -> Result<TokenInfo, AuthError> {
        Self::refresh_inner(&self.inner).await
    }

    async fn refresh_inner(inner: &Arc<Inner>) -> Result<TokenInfo, AuthError> {
        let uid = inner
            .user
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|u| u.uid.clone());
        let Some(uid) = uid else {
            tracing::error!(category = LOG_CATEGORY, "Token refresh failed, no user");
            return Err(AuthError::new(AuthErrorCode::SessionExpired, "no user found for token refresh"));
        };

        tracing::debug!(category = LOG_CATEGORY, %uid, "Starting token refresh");

        let refresh_timeout = Duration::from_millis(inner.config.refresh_timeout_ms);
        let decode_timeout = Duration::from_millis(inner.config.decode_timeout_ms);
        let provider = inner.provider.clone();

        let outcome = with_retry(
            || {
                let provider = provider.clone();
                async move {
                    let token = with_timeout(provider.get_token(true), refresh_timeout, "token refresh").await?;
                    let expires_at = with_timeout(provider.token_expiration(), decode_timeout, "token decode").await?;
                    Ok(TokenInfo { token, expires_at })
                }
            },
            &inner.retry,
            DEFAULT_RETRYABLE_CODES,
        )
        .await;

        match outcome {
            Ok(info) => {
                let remaining = info.expires_at.signed_duration_since(inner.clock.now());
                tracing::debug!(category = LOG_CATEGORY, %uid, expires_in_secs = remaining.num_seconds(), "Token refreshed");

                if remaining < Self::expiry_threshold(&inner.config) {
                    tracing::warn!(category = LOG_CATEGORY, expires_in_secs = remaining.num_seconds(), "Token expiration approaching");
                    inner
                        .notifier
                        .warning("Your session will expire soon", NotificationOptions::toast(TOKEN_TOAST));
                }

                *inner.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(info.clone());
                Ok(info)
            }
            Err(e) => {
                tracing::error!(category = LOG_CATEGORY, error = %e, "Token refresh failed");
                inner
                    .notifier
                    .error("Token refresh failed", NotificationOptions::toast(TOKEN_TOAST));
                Err(AuthError::new(
                    AuthErrorCode::SessionExpired,
                    format!("failed to refresh token: {}", e),
                ))
            }
        }
    }

    /// Current token, refreshed first when it is about to expire
    pub async fn get_token(&self) -> Result<String, AuthError> {
        let current = self.current();
        let Some(info) = current else {
            tracing::error!(category = LOG_CATEGORY, "Token requested but none available");
            return Err(AuthError::new(AuthErrorCode::SessionExpired, "no token available"));
        };

        let remaining = info.expires_at.signed_duration_since(self.inner.clock.now());
        if remaining < Self::expiry_threshold(&self.inner.config) {
            tracing::info!(category = LOG_CATEGORY, expires_in_secs = remaining.num_seconds(), "Token near expiry, refreshing");
            return Ok(self.refresh().await?.token);
        }

        Ok(info.token)
    }

    pub fn current(&self) -> Option<TokenInfo> {
        self.inner.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_token_expired(&self) -> bool {
        let expired = self
            .current()
            .map_or(true, |info| info.expires_at <= self.inner.clock.now());
        if expired {
            tracing::warn!(category = LOG_CATEGORY, "Token is expired or missing");
        }
        expired
    }

    pub fn is_refresh_timer_running(&self) -> bool {
        self.inner
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the timer and forget the user and token
    pub fn cleanup(&self) {
        tracing::info!(category = LOG_CATEGORY, "Cleaning up token service");
        self.stop_refresh_timer();
        *self.inner.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.inner.user.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn expiry_threshold(config: &TokenConfig) -> ChronoDuration {
        span_secs(config.expiry_threshold_secs)
    }

    fn start_refresh_timer(&self) {
        self.stop_refresh_timer();

        let period = Duration::from_secs(self.inner.config.refresh_interval_secs.clamp(1, MAX_SPAN_SECS));
        // The task must not keep the service alive
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };

                if let Err(e) = Self::refresh_inner(&inner).await {
                    tracing::error!(category = LOG_CATEGORY, error = %e, "Automatic token refresh failed");
                    *inner.token.lock().unwrap_or_else(|e| e.into_inner()) = None;

                    match &inner.session {
                        Some(session) => session.do_send(EndSession {
                            reason: EndReason::RefreshFailed,
                        }),
                        None => inner.notifier.error(
                            AuthErrorCode::SessionExpired.user_message(),
                            NotificationOptions::toast(TOKEN_TOAST),
                        ),
                    }
                    break;
                }
            }
        });

        tracing::debug!(category = LOG_CATEGORY, period_secs = period.as_secs(), "Refresh timer started");
        *self.inner.refresh_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    fn stop_refresh_timer(&self) {
        if let Some(task) = self.inner.refresh_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            tracing::debug!(category = LOG_CATEGORY, "Stopping refresh timer");
            task.abort();
        }
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("token", &self.current().map(|t| t.expires_at))
            .finish_non_exhaustive()
    }
}
