// common/src/utils.rs
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

/// Setup tracing for consistent logging across tab runtimes
pub fn setup_tracing(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Identifier for one tab, generated once per tab lifetime
pub fn new_tab_id() -> String {
    Uuid::new_v4().to_string()
}
