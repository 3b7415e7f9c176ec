//! Offline Sync Server
//!
//! Reconciliation core for offline-first devices: sync batches with conflict
//! detection and resolution, bounded offline sessions with queued writes and
//! data packages, and incremental change feeds. Entity storage, session
//! storage, auditing and cache invalidation are injected collaborators.

pub mod audit;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod offline;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod sync;

pub use service::SyncService;
