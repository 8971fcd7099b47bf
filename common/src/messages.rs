// common/src/messages.rs
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::auth::{AuthSnapshot, UserState, WalletState};

/// Broadcast envelope exchanged between tabs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(flatten)]
    pub payload: SyncPayload,
    /// Wall-clock milliseconds at broadcast time
    pub timestamp: i64,
    /// Tab that emitted the message
    pub origin_id: String,
    #[serde(default)]
    pub priority: i32,
}

impl SyncMessage {
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

/// Typed message body, one variant per message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPayload {
    UpdateUser(Option<UserState>),
    WalletConnect(Option<WalletState>),
    WalletDisconnect,
    #[serde(rename_all = "camelCase")]
    NetworkChange { chain_id: u64 },
    AuthStateChange(AuthSnapshot),
    #[serde(rename_all = "camelCase")]
    SessionActivity { last_activity: i64 },
    SessionExpired,
    SessionLogout,
    SessionUpdate(UserState),
}

impl SyncPayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::UpdateUser(_) => MessageKind::UpdateUser,
            Self::WalletConnect(_) => MessageKind::WalletConnect,
            Self::WalletDisconnect => MessageKind::WalletDisconnect,
            Self::NetworkChange { .. } => MessageKind::NetworkChange,
            Self::AuthStateChange(_) => MessageKind::AuthStateChange,
            Self::SessionActivity { .. } => MessageKind::SessionActivity,
            Self::SessionExpired => MessageKind::SessionExpired,
            Self::SessionLogout => MessageKind::SessionLogout,
            Self::SessionUpdate(_) => MessageKind::SessionUpdate,
        }
    }
}

/// Message type key used for debouncing, conflict resolution and state caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    UpdateUser,
    WalletConnect,
    WalletDisconnect,
    NetworkChange,
    AuthStateChange,
    SessionActivity,
    SessionExpired,
    SessionLogout,
    SessionUpdate,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateUser => "UPDATE_USER",
            Self::WalletConnect => "WALLET_CONNECT",
            Self::WalletDisconnect => "WALLET_DISCONNECT",
            Self::NetworkChange => "NETWORK_CHANGE",
            Self::AuthStateChange => "AUTH_STATE_CHANGE",
            Self::SessionActivity => "SESSION_ACTIVITY",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SessionLogout => "SESSION_LOGOUT",
            Self::SessionUpdate => "SESSION_UPDATE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
