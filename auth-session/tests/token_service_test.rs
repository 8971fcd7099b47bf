// auth-session/tests/token_service_test.rs
use auth_session::providers::{IdentityProvider, InMemoryIdentityProvider};
use auth_session::retry::RetryConfig;
use auth_session::token_service::TokenService;
use chrono::Duration as ChronoDuration;
use common::models::auth::UserState;
use common::{AuthErrorCode, ManualClock, NotificationCenter, NotificationLevel, RetryDefaults, TokenConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const EMAIL: &str = "ada@example.com";

struct Fixture {
    service: TokenService,
    provider: Arc<InMemoryIdentityProvider>,
    notifications: Arc<NotificationCenter>,
    user: UserState,
}

async fn fixture(token_lifetime: ChronoDuration) -> Fixture {
    fixture_with_retry(token_lifetime, RetryDefaults::default()).await
}

async fn fixture_with_retry(token_lifetime: ChronoDuration, retry: RetryDefaults) -> Fixture {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let provider = Arc::new(InMemoryIdentityProvider::new(clock.clone()).with_token_lifetime(token_lifetime));
    provider.add_account(
        EMAIL,
        "pw",
        UserState {
            uid: "uid-ada".into(),
            email: Some(EMAIL.into()),
            ..Default::default()
        },
    );
    let user = provider.sign_in(EMAIL, "pw").await.unwrap();

    let notifications = Arc::new(NotificationCenter::default());
    let service = TokenService::new(
        provider.clone(),
        clock,
        notifications.clone(),
        TokenConfig::default(),
        RetryConfig::from(&retry),
    );

    Fixture {
        service,
        provider,
        notifications,
        user,
    }
}

#[tokio::test(start_paused = true)]
async fn initialize_fetches_token_and_starts_timer() {
    let f = fixture(ChronoDuration::hours(1)).await;
    f.service.initialize(Some(f.user.clone())).await.unwrap();

    assert_eq!(f.service.get_token().await.unwrap(), "id-token-1");
    assert!(f.service.is_refresh_timer_running());
    assert!(!f.service.is_token_expired());
    assert_eq!(f.notifications.count(NotificationLevel::Warning), 0);

    f.service.cleanup();
    assert!(!f.service.is_refresh_timer_running());
    assert!(f.service.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let f = fixture(ChronoDuration::hours(1)).await;
    f.provider
        .fail_next_token_requests(2, AuthErrorCode::NetworkRequestFailed);

    let started = Instant::now();
    f.service.initialize(Some(f.user.clone())).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(f.provider.tokens_issued(), 1);
    f.service.cleanup();
}

#[tokio::test(start_paused = true)]
async fn configured_retry_budget_is_honoured() {
    let retry = RetryDefaults {
        max_attempts: 1,
        ..RetryDefaults::default()
    };
    let f = fixture_with_retry(ChronoDuration::hours(1), retry).await;
    f.provider
        .fail_next_token_requests(1, AuthErrorCode::NetworkRequestFailed);

    let err = f.service.initialize(Some(f.user.clone())).await.unwrap_err();

    assert_eq!(err.code(), AuthErrorCode::SessionExpired);
    assert_eq!(f.provider.tokens_issued(), 0);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_failure_surfaces_as_session_expired() {
    let f = fixture(ChronoDuration::hours(1)).await;
    f.provider
        .fail_next_token_requests(1, AuthErrorCode::InvalidSignature);

    let err = f.service.initialize(Some(f.user.clone())).await.unwrap_err();

    assert_eq!(err.code(), AuthErrorCode::SessionExpired);
    assert_eq!(f.provider.tokens_issued(), 0);
    assert!(!f.service.is_refresh_timer_running());
    assert_eq!(f.notifications.count(NotificationLevel::Error), 1);
}

#[tokio::test(start_paused = true)]
async fn short_lived_token_warns_and_is_refreshed_on_read() {
    let f = fixture(ChronoDuration::minutes(4)).await;
    f.service.initialize(Some(f.user.clone())).await.unwrap();
    assert_eq!(f.notifications.count(NotificationLevel::Warning), 1);

    assert_eq!(f.service.get_token().await.unwrap(), "id-token-2");
    assert_eq!(f.provider.tokens_issued(), 2);
    f.service.cleanup();
}

#[tokio::test(start_paused = true)]
async fn timer_refreshes_every_interval() {
    let f = fixture(ChronoDuration::hours(1)).await;
    f.service.initialize(Some(f.user.clone())).await.unwrap();

    tokio::time::sleep(Duration::from_secs(45 * 60 + 1)).await;
    assert_eq!(f.provider.tokens_issued(), 2);

    tokio::time::sleep(Duration::from_secs(45 * 60)).await;
    assert_eq!(f.provider.tokens_issued(), 3);
    f.service.cleanup();
}

#[tokio::test(start_paused = true)]
async fn failed_timer_refresh_clears_token_and_stops() {
    let f = fixture(ChronoDuration::hours(1)).await;
    f.service.initialize(Some(f.user.clone())).await.unwrap();
    f.provider
        .fail_next_token_requests(10, AuthErrorCode::NetworkRequestFailed);

    tokio::time::sleep(Duration::from_secs(45 * 60 + 10)).await;

    assert!(f.service.current().is_none());
    assert!(!f.service.is_refresh_timer_running());
    assert!(f.notifications.count(NotificationLevel::Error) >= 1);
    assert_eq!(
        f.service.get_token().await.unwrap_err().code(),
        AuthErrorCode::SessionExpired
    );
}

#[tokio::test(start_paused = true)]
async fn initialize_without_user_tears_down() {
    let f = fixture(ChronoDuration::hours(1)).await;
    f.service.initialize(Some(f.user.clone())).await.unwrap();
    f.service.initialize(None).await.unwrap();

    assert!(f.service.current().is_none());
    assert!(!f.service.is_refresh_timer_running());
    assert!(f.service.is_token_expired());
}
