//! Client session manager for repository lounges.
//!
//! Owns one logical channel per process, the connect/reconnect lifecycle,
//! and the local message/conversation log for the active room. The UI layer
//! consumes status transitions and session events through subscription
//! handles; nothing here renders anything.

pub mod log;
pub mod session;

pub use log::RoomLog;
pub use session::{
    ConnStatus, SessionConfig, SessionEvent, SessionEvents, SessionManager,
};
