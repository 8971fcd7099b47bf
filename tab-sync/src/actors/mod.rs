// tab-sync/src/actors/mod.rs

pub mod tab_sync;
