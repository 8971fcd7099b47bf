// tab-sync/src/lib.rs
pub mod actors;
pub mod bus;
pub mod resolver;
pub mod subscription;

pub use actors::tab_sync::{
    Broadcast, Close, GetState, GetSyncStatus, Subscribe, SyncNotification, SyncStatus, TabSyncActor,
    Unsubscribe,
};
pub use bus::{BusError, LocalBus};
pub use resolver::{ConflictResolver, ResolverRegistry};
pub use subscription::{subscribe, Subscription};
