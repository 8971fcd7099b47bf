// auth-session/src/utils/token.rs
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

/// Random alphanumeric string of `length` characters from the thread RNG
pub fn generate_secure_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Hex-encoded SHA-256 of `input`
pub fn hash_string(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Mint an opaque session id bound to the device and the sign-in instant
pub fn create_session_id(device_id: &str, now_millis: i64) -> String {
    let input = format!("{}-{}-{}", device_id, now_millis, generate_secure_token(32));
    hash_string(&input)
}

/// Identifier persisted once per browser profile
pub fn create_device_id() -> String {
    format!("device_{}", generate_secure_token(24).to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_token_has_requested_length() {
        assert_eq!(generate_secure_token(32).len(), 32);
        assert!(generate_secure_token(8).chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_string("tokenforge");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_string("tokenforge"));
    }

    #[test]
    fn session_ids_are_unique_per_call() {
        let a = create_session_id("device_1", 1_000);
        let b = create_session_id("device_1", 1_000);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn device_id_is_prefixed() {
        let id = create_device_id();
        assert!(id.starts_with("device_"));
        assert_eq!(id.len(), "device_".len() + 24);
    }
}
