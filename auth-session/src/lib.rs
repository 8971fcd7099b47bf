// auth-session/src/lib.rs
pub mod actors;
pub mod auth_sync;
pub mod lockout;
pub mod providers;
pub mod retry;
pub mod runtime;
pub mod state_store;
pub mod token_service;
pub mod utils;
pub mod wallet_reconnection;

pub use retry::{retry_with_timeout, with_retry, with_timeout, RetryConfig, RetryResult};
pub use runtime::{SharedResources, TabRuntime};
