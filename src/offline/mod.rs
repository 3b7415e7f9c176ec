//! Offline sessions
//!
//! Bounded-lifetime grants that let a device work disconnected: data package
//! export on the way out, queued writes while away.

mod package;
mod session;
mod types;

pub use package::compute_checksum;
pub use session::OfflineSessionManager;
pub(crate) use session::require_capability;
pub use types::*;
