//! Sync reconciliation core
//!
//! Upload path: [`BatchCoordinator`] runs each change through the
//! [`ConflictDetector`] and, when clear, the shared [`ChangeApplier`].
//! Flagged conflicts are settled later by the [`ConflictResolver`].
//!
//! Download path: [`ChangeFeedBuilder`] pages changes since a watermark.

mod apply;
mod coordinator;
mod detector;
mod error;
mod feed;
mod resolver;
mod store;
mod types;

pub use apply::{Applied, ChangeApplier};
pub use coordinator::BatchCoordinator;
pub use detector::ConflictDetector;
pub use error::{Result, SyncError};
pub use feed::{ChangeFeed, ChangeFeedBuilder, FeedCache, SERVER_ACTOR};
pub use resolver::ConflictResolver;
pub use store::{BatchStore, BATCH_KEY_PREFIX};
pub use types::*;
