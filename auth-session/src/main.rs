// auth-session/src/main.rs
// Two tabs sharing one bus and one store: sign in and connect a wallet in tab A,
// watch tab B follow, then sign out from tab B.
use auth_session::providers::{InMemoryIdentityProvider, InMemoryWallet};
use auth_session::{SharedResources, TabRuntime};
use common::models::auth::UserState;
use common::{setup_tracing, Clock, Config, NotificationCenter, SystemClock};
use std::sync::Arc;

const DEMO_EMAIL: &str = "demo@tokenforge.dev";
const DEMO_PASSWORD: &str = "demo";
const DEMO_ADDRESS: &str = "0x71C7656EC7ab88b098defB751B7401B5f6d8976F";

#[actix::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    setup_tracing(&config.log_level);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifications = Arc::new(NotificationCenter::default());
    let shared = SharedResources::new(&config)
        .with_clock(clock.clone())
        .with_notifier(notifications.clone());

    let provider = Arc::new(InMemoryIdentityProvider::new(clock));
    provider.add_account(
        DEMO_EMAIL,
        DEMO_PASSWORD,
        UserState {
            uid: "demo-user".to_string(),
            email: Some(DEMO_EMAIL.to_string()),
            email_verified: true,
            can_create_token: true,
            can_use_services: true,
            ..Default::default()
        },
    );
    let wallet = Arc::new(InMemoryWallet::new(DEMO_ADDRESS, config.wallet.expected_chain_id));

    let tab_a = TabRuntime::start(&config, &shared, provider.clone(), wallet.clone()).await?;
    let tab_b = TabRuntime::start(&config, &shared, provider.clone(), wallet.clone()).await?;
    let settle = config.sync.debounce() * 3;

    let session = tab_a.sign_in(DEMO_EMAIL, DEMO_PASSWORD).await?;
    tracing::info!(session_id = %session.session_id, expires_at = %session.expires_at, "Tab A signed in");

    let reconnected = tab_a.wallet().reconnect(Some(&DEMO_ADDRESS.to_lowercase())).await;
    tracing::info!(reconnected, "Tab A wallet reconnection finished");

    tokio::time::sleep(settle).await;
    let snapshot = tab_b.snapshot().await?;
    tracing::info!(
        authenticated = snapshot.is_authenticated,
        user = ?snapshot.user.as_ref().map(|u| &u.uid),
        wallet = ?snapshot.wallet,
        "Tab B sees"
    );

    tab_b.sign_out().await?;
    tokio::time::sleep(settle).await;
    let snapshot = tab_a.snapshot().await?;
    tracing::info!(authenticated = snapshot.is_authenticated, "Tab A after sign-out in tab B");

    for notification in notifications.drain() {
        tracing::info!(level = ?notification.level, "Notification: {}", notification.message);
    }

    tab_a.shutdown().await;
    tab_b.shutdown().await;
    Ok(())
}
