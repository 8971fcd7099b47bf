// common/src/models/auth.rs
use serde::{Deserialize, Serialize};

/// Signed-in user as shared between tabs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub can_create_token: bool,
    #[serde(default)]
    pub can_use_services: bool,
    /// Milliseconds since epoch of the most recent login
    #[serde(default)]
    pub last_login_time: Option<i64>,
}

/// Wallet connection as observed by a tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub address: Option<String>,
    pub chain_id: Option<u64>,
    pub is_connected: bool,
    /// Milliseconds since epoch when this state was observed
    pub timestamp: i64,
}

impl WalletState {
    pub fn connected(address: impl Into<String>, chain_id: u64, timestamp: i64) -> Self {
        Self {
            address: Some(address.into()),
            chain_id: Some(chain_id),
            is_connected: true,
            timestamp,
        }
    }

    pub fn disconnected(timestamp: i64) -> Self {
        Self {
            address: None,
            chain_id: None,
            is_connected: false,
            timestamp,
        }
    }
}

/// Whole auth picture of a tab, broadcast on sign-in/sign-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    pub is_authenticated: bool,
    pub user: Option<UserState>,
    pub wallet: Option<WalletState>,
}
