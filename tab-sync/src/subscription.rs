// tab-sync/src/subscription.rs
use actix::{Addr, MailboxError, Recipient};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::actors::tab_sync::{Subscribe, SubscriberId, SyncNotification, TabSyncActor, Unsubscribe};

/// Handle to a registered subscriber. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    tab_sync: Addr<TabSyncActor>,
    active: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop receiving notifications. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.tab_sync.do_send(Unsubscribe { id: self.id });
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Register `recipient` for resolved state changes coming from other tabs
pub async fn subscribe(
    tab_sync: &Addr<TabSyncActor>,
    recipient: Recipient<SyncNotification>,
) -> Result<Subscription, MailboxError> {
    let id = tab_sync.send(Subscribe { recipient }).await?;
    Ok(Subscription {
        id,
        tab_sync: tab_sync.clone(),
        active: AtomicBool::new(true),
    })
}
