//! Application Services
//!
//! - `SessionManager`: issue, validate, revoke and expire sessions
//! - `SessionSweeper`: periodic driver for expired session cleanup

mod session_manager;
mod session_sweeper;

pub use session_manager::{
    DEFAULT_SESSION_TTL, DEFAULT_STORE_TIMEOUT, SessionManager, SessionSettings,
};
pub use session_sweeper::{DEFAULT_SWEEP_INTERVAL, SessionSweeper, SweepStats};
