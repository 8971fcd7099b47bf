pub mod auth_state;
pub mod session_timer;
