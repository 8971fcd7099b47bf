pub mod clock;
pub mod config;
pub mod errors;
pub mod messages;
pub mod models;
pub mod notify;
pub mod storage;
pub mod utils;

pub use clock::*;
pub use config::*;
pub use errors::*;
pub use messages::*;
pub use notify::*;
pub use utils::*;
