// auth-session/src/lockout.rs
use common::{span_secs, AuthError, AuthErrorCode, Clock, LockoutConfig, NotificationOptions, NotificationSink};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const LOG_CATEGORY: &str = "LoginGuard";

#[derive(Debug, Default, Clone, Copy)]
struct FailureEntry {
    failures: u32,
    blocked_until: Option<i64>,
}

/// Blocks a uid for a while after repeated failed session validations.
#[derive(Clone)]
pub struct LoginGuard {
    max_failures: u32,
    block_millis: i64,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    store: Arc<Mutex<HashMap<String, FailureEntry>>>,
}

impl LoginGuard {
    pub fn new(config: &LockoutConfig, clock: Arc<dyn Clock>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            max_failures: config.max_failed_attempts.max(1),
            block_millis: span_secs(config.block_duration_secs).num_milliseconds(),
            clock,
            notifier,
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_blocked(&self, uid: &str) -> bool {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now_millis();

        match store.get(uid).and_then(|entry| entry.blocked_until) {
            Some(until) if now < until => true,
            Some(_) => {
                // Block elapsed: start from a clean slate
                store.remove(uid);
                false
            }
            None => false,
        }
    }

    /// `Err(account-blocked)` while `uid` is blocked
    pub fn check(&self, uid: &str) -> Result<(), AuthError> {
        if self.is_blocked(uid) {
            return Err(AuthError::new(
                AuthErrorCode::AccountBlocked,
                format!("account {} is temporarily blocked", uid),
            ));
        }
        Ok(())
    }

    /// Count a failure; returns true when this failure triggers a block
    pub fn record_failure(&self, uid: &str) -> bool {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let entry = store.entry(uid.to_string()).or_default();
        if entry.blocked_until.is_some() {
            return false;
        }

        entry.failures += 1;
        if entry.failures < self.max_failures {
            tracing::debug!(category = LOG_CATEGORY, uid, failures = entry.failures, "Failed validation recorded");
            return false;
        }

        entry.blocked_until = Some(self.clock.now_millis() + self.block_millis);
        drop(store);

        tracing::warn!(category = LOG_CATEGORY, uid, "Account temporarily blocked");
        self.notifier.warning(
            AuthErrorCode::AccountBlocked.user_message(),
            NotificationOptions::toast(format!("lockout-{}", uid)),
        );
        true
    }

    pub fn record_success(&self, uid: &str) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if store.get(uid).is_some_and(|entry| entry.blocked_until.is_none()) {
            store.remove(uid);
        }
    }
}

impl std::fmt::Debug for LoginGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginGuard")
            .field("max_failures", &self.max_failures)
            .field("block_millis", &self.block_millis)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{ManualClock, NotificationCenter, NotificationLevel};

    fn guard() -> (LoginGuard, Arc<ManualClock>, Arc<NotificationCenter>) {
        let clock = Arc::new(ManualClock::new(0));
        let center = Arc::new(NotificationCenter::default());
        let guard = LoginGuard::new(&LockoutConfig::default(), clock.clone(), center.clone());
        (guard, clock, center)
    }

    #[test]
    fn third_failure_blocks_for_fifteen_minutes() {
        let (guard, clock, center) = guard();

        assert!(!guard.record_failure("uid-1"));
        assert!(!guard.record_failure("uid-1"));
        assert!(guard.record_failure("uid-1"));
        assert_eq!(guard.check("uid-1").unwrap_err().code(), AuthErrorCode::AccountBlocked);
        assert_eq!(center.count(NotificationLevel::Warning), 1);

        clock.advance(Duration::minutes(14));
        assert!(guard.is_blocked("uid-1"));
        clock.advance(Duration::minutes(2));
        assert!(!guard.is_blocked("uid-1"));
        assert!(guard.check("uid-1").is_ok());
    }

    #[test]
    fn oversized_block_duration_is_capped() {
        let clock = Arc::new(ManualClock::new(0));
        let config = LockoutConfig {
            max_failed_attempts: 1,
            block_duration_secs: u64::MAX,
        };
        let guard = LoginGuard::new(&config, clock.clone(), Arc::new(NotificationCenter::default()));

        assert!(guard.record_failure("uid-1"));
        clock.advance(Duration::days(365));
        assert!(guard.is_blocked("uid-1"));
    }

    #[test]
    fn success_resets_the_count() {
        let (guard, _, _) = guard();

        guard.record_failure("uid-1");
        guard.record_failure("uid-1");
        guard.record_success("uid-1");
        assert!(!guard.record_failure("uid-1"));
        assert!(!guard.is_blocked("uid-1"));
    }

    #[test]
    fn success_does_not_lift_an_active_block() {
        let (guard, _, _) = guard();
        for _ in 0..3 {
            guard.record_failure("uid-1");
        }
        guard.record_success("uid-1");
        assert!(guard.is_blocked("uid-1"));
        assert!(!guard.is_blocked("uid-2"));
    }
}
