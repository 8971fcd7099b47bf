// tab-sync/src/resolver.rs
use common::models::auth::{UserState, WalletState};
use common::{MessageKind, SyncPayload};
use std::collections::HashMap;

/// Reconciles this tab's cached state with an incoming payload of the same kind.
pub trait ConflictResolver: Send {
    fn resolve(&self, current: Option<&SyncPayload>, incoming: SyncPayload) -> SyncPayload;
}

impl<F> ConflictResolver for F
where
    F: Fn(Option<&SyncPayload>, SyncPayload) -> SyncPayload + Send,
{
    fn resolve(&self, current: Option<&SyncPayload>, incoming: SyncPayload) -> SyncPayload {
        self(current, incoming)
    }
}

/// Merge two user records; incoming fields win, the later login time is kept.
pub fn resolve_user(current: Option<&UserState>, incoming: Option<&UserState>) -> Option<UserState> {
    match (current, incoming) {
        (None, None) => None,
        (Some(current), None) => Some(current.clone()),
        (None, Some(incoming)) => Some(incoming.clone()),
        (Some(current), Some(incoming)) => {
            let last_login = current
                .last_login_time
                .unwrap_or(0)
                .max(incoming.last_login_time.unwrap_or(0));

            Some(UserState {
                uid: incoming.uid.clone(),
                email: incoming.email.clone().or_else(|| current.email.clone()),
                email_verified: incoming.email_verified,
                is_admin: incoming.is_admin,
                can_create_token: incoming.can_create_token,
                can_use_services: incoming.can_use_services,
                last_login_time: (last_login > 0).then_some(last_login),
            })
        }
    }
}

/// Keep whichever wallet state was observed later; ties keep the current one.
pub fn resolve_wallet(current: Option<&WalletState>, incoming: Option<&WalletState>) -> Option<WalletState> {
    match (current, incoming) {
        (None, None) => None,
        (Some(current), None) => Some(current.clone()),
        (None, Some(incoming)) => Some(incoming.clone()),
        (Some(current), Some(incoming)) => {
            if incoming.timestamp > current.timestamp {
                Some(incoming.clone())
            } else {
                Some(current.clone())
            }
        }
    }
}

fn user_resolver(current: Option<&SyncPayload>, incoming: SyncPayload) -> SyncPayload {
    let SyncPayload::UpdateUser(incoming) = incoming else {
        return incoming;
    };
    let current = match current {
        Some(SyncPayload::UpdateUser(user)) => user.as_ref(),
        _ => None,
    };
    SyncPayload::UpdateUser(resolve_user(current, incoming.as_ref()))
}

fn wallet_resolver(current: Option<&SyncPayload>, incoming: SyncPayload) -> SyncPayload {
    let SyncPayload::WalletConnect(incoming) = incoming else {
        return incoming;
    };
    let current = match current {
        Some(SyncPayload::WalletConnect(wallet)) => wallet.as_ref(),
        _ => None,
    };
    SyncPayload::WalletConnect(resolve_wallet(current, incoming.as_ref()))
}

/// Resolvers keyed by message kind. Kinds without one are last-write-wins.
pub struct ResolverRegistry {
    resolvers: HashMap<MessageKind, Box<dyn ConflictResolver>>,
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(MessageKind::UpdateUser, user_resolver);
        registry.register(MessageKind::WalletConnect, wallet_resolver);
        registry
    }
}

impl ResolverRegistry {
    pub fn empty() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: MessageKind, resolver: impl ConflictResolver + 'static) {
        self.resolvers.insert(kind, Box::new(resolver));
    }

    pub fn contains(&self, kind: MessageKind) -> bool {
        self.resolvers.contains_key(&kind)
    }

    /// Resolve `incoming` against `current`, or take `incoming` as-is when no resolver is registered
    pub fn resolve(&self, kind: MessageKind, current: Option<&SyncPayload>, incoming: SyncPayload) -> SyncPayload {
        match self.resolvers.get(&kind) {
            Some(resolver) => resolver.resolve(current, incoming),
            None => incoming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(uid: &str, email: Option<&str>, last_login: Option<i64>) -> UserState {
        UserState {
            uid: uid.to_string(),
            email: email.map(str::to_string),
            last_login_time: last_login,
            ..Default::default()
        }
    }

    #[test]
    fn user_merge_keeps_greater_login_in_either_order() {
        let a = user("u1", Some("a@example.com"), Some(2_000));
        let b = user("u1", None, Some(1_000));

        let ab = resolve_user(Some(&a), Some(&b)).unwrap();
        let ba = resolve_user(Some(&b), Some(&a)).unwrap();

        assert_eq!(ab.last_login_time, Some(2_000));
        assert_eq!(ba.last_login_time, Some(2_000));
        assert_eq!(ab.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn user_merge_without_logins_stays_unset() {
        let merged = resolve_user(Some(&user("u1", None, None)), Some(&user("u1", None, None))).unwrap();
        assert_eq!(merged.last_login_time, None);
    }

    #[test]
    fn resolvers_return_whichever_side_is_present() {
        let wallet = WalletState::connected("0xabc", 1, 10);
        assert_eq!(resolve_wallet(None, Some(&wallet)), Some(wallet.clone()));
        assert_eq!(resolve_wallet(Some(&wallet), None), Some(wallet));
        assert_eq!(resolve_wallet(None, None), None);

        let u = user("u1", None, Some(5));
        assert_eq!(resolve_user(None, Some(&u)), Some(u.clone()));
        assert_eq!(resolve_user(Some(&u), None), Some(u));
    }

    #[test]
    fn wallet_keeps_newer_timestamp() {
        let older = WalletState::connected("0xold", 1, 100);
        let newer = WalletState::connected("0xnew", 137, 200);

        assert_eq!(resolve_wallet(Some(&older), Some(&newer)), Some(newer.clone()));
        assert_eq!(resolve_wallet(Some(&newer), Some(&older)), Some(newer));
    }

    #[test]
    fn registry_falls_back_to_last_write_wins() {
        let registry = ResolverRegistry::default();
        assert!(registry.contains(MessageKind::UpdateUser));
        assert!(!registry.contains(MessageKind::NetworkChange));

        let current = SyncPayload::NetworkChange { chain_id: 1 };
        let resolved = registry.resolve(
            MessageKind::NetworkChange,
            Some(&current),
            SyncPayload::NetworkChange { chain_id: 137 },
        );
        assert_eq!(resolved, SyncPayload::NetworkChange { chain_id: 137 });
    }

    #[test]
    fn registry_applies_wallet_resolver_against_cached_payload() {
        let registry = ResolverRegistry::default();
        let cached = SyncPayload::WalletConnect(Some(WalletState::connected("0xnew", 1, 500)));
        let stale = SyncPayload::WalletConnect(Some(WalletState::connected("0xold", 1, 400)));

        let resolved = registry.resolve(MessageKind::WalletConnect, Some(&cached), stale);
        assert_eq!(resolved, cached);
    }
}
