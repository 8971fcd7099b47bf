// common/src/errors.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::storage::StorageError;

/// Error codes shared by every auth, wallet and session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthErrorCode {
    NetworkRequestFailed,
    Timeout,
    TooManyRequests,
    InternalError,
    WalletNotFound,
    NetworkMismatch,
    InvalidSignature,
    SessionExpired,
    WalletDisconnected,
    ProviderError,
    UserNotFound,
    AccountBlocked,
    StorageError,
}

/// Codes the retry executor treats as transient unless told otherwise.
pub const DEFAULT_RETRYABLE_CODES: &[AuthErrorCode] = &[
    AuthErrorCode::NetworkRequestFailed,
    AuthErrorCode::Timeout,
    AuthErrorCode::TooManyRequests,
    AuthErrorCode::InternalError,
];

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkRequestFailed => "network-request-failed",
            Self::Timeout => "timeout",
            Self::TooManyRequests => "too-many-requests",
            Self::InternalError => "internal-error",
            Self::WalletNotFound => "wallet-not-found",
            Self::NetworkMismatch => "network-mismatch",
            Self::InvalidSignature => "invalid-signature",
            Self::SessionExpired => "session-expired",
            Self::WalletDisconnected => "wallet-disconnected",
            Self::ProviderError => "provider-error",
            Self::UserNotFound => "user-not-found",
            Self::AccountBlocked => "account-blocked",
            Self::StorageError => "storage-error",
        }
    }

    /// Message shown to the user when an error with this code surfaces.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NetworkRequestFailed => "Network error. Please check your connection.",
            Self::Timeout => "The request took too long. Please try again.",
            Self::TooManyRequests => "Too many attempts. Please try again later.",
            Self::InternalError => "Internal server error.",
            Self::WalletNotFound => "Wallet not found. Please make sure MetaMask is installed.",
            Self::NetworkMismatch => "Incorrect network. Please switch to a supported network.",
            Self::InvalidSignature => "Invalid signature. Please try again.",
            Self::SessionExpired => "Session expired. Please sign in again.",
            Self::WalletDisconnected => "Wallet disconnected.",
            Self::ProviderError => "Web3 provider error.",
            Self::UserNotFound => "No user found with these credentials.",
            Self::AccountBlocked => "Account temporarily blocked after too many failed attempts.",
            Self::StorageError => "Local data is unavailable.",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the auth/session layer.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{message} ({code})")]
    Domain { code: AuthErrorCode, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<AuthError>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self::Domain {
            code,
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Code used for retry classification. An exhausted retry reports the code of its last cause.
    pub fn code(&self) -> AuthErrorCode {
        match self {
            Self::Domain { code, .. } => *code,
            Self::Timeout { .. } => AuthErrorCode::Timeout,
            Self::RetryExhausted { source, .. } => source.code(),
            Self::Storage(_) => AuthErrorCode::StorageError,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn user_message(&self) -> &'static str {
        self.code().user_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_error_reports_cause_code_and_attempts() {
        let err = AuthError::RetryExhausted {
            attempts: 3,
            source: Box::new(AuthError::new(AuthErrorCode::NetworkRequestFailed, "offline")),
        };
        assert_eq!(err.code(), AuthErrorCode::NetworkRequestFailed);
        assert_eq!(
            err.to_string(),
            "operation failed after 3 attempts: offline (network-request-failed)"
        );
    }

    #[test]
    fn timeout_names_operation_and_duration() {
        let err = AuthError::timeout("token refresh", 10_000);
        assert!(err.is_timeout());
        assert_eq!(err.code(), AuthErrorCode::Timeout);
        assert_eq!(err.to_string(), "token refresh timed out after 10000ms");
    }

    #[test]
    fn codes_serialize_in_kebab_case() {
        let json = serde_json::to_string(&AuthErrorCode::NetworkMismatch).unwrap();
        assert_eq!(json, "\"network-mismatch\"");
        assert!(DEFAULT_RETRYABLE_CODES.contains(&AuthErrorCode::Timeout));
        assert!(!DEFAULT_RETRYABLE_CODES.contains(&AuthErrorCode::WalletNotFound));
    }
}
