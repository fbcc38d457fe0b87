//! # Kellerbuch Sync
//!
//! Offline-first synchronization engine for a wine collection record keeper.
//!
//! The application mirrors its remote backend (wines, bottles, tasting notes,
//! storage locations) into a local SQLite database and keeps working while
//! disconnected. This crate owns everything needed to reconcile that local
//! activity later:
//! - A local store serving all reads while the network is unavailable
//! - A durable mutation outbox replayed in sequence order
//! - A separate photo outbox for binary attachments
//! - Drain engines with bounded retries and identifier reconciliation
//!   (locally minted `tmp-` ids are rewritten to server ids everywhere)
//! - A connectivity monitor that triggers drains on reachability changes
//!   and via a fallback timer
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use kellerbuch_sync::{Database, SyncEngine, ConnectivityMonitor};
//!
//! let db = Database::open("./data/kellerbuch.db")?;
//! let engine = SyncEngine::from_settings(db)?;
//! let monitor = ConnectivityMonitor::new(engine.clone());
//! monitor.start();
//! ```
//!
//! The UI layer never talks to the outboxes directly; it goes through
//! [`SyncEngine::read`], [`SyncEngine::mutate`] and
//! [`SyncEngine::attach_photo`], which attempt the remote backend first and
//! fall back to the outboxes when it is unreachable.

pub mod database;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;

pub use database::Database;
pub use error::SyncError;
pub use models::{
    Bottle, EntityId, EntityKind, MutationKind, Record, StorageLocation, SyncSettings, TastingNote,
    Wine,
};
pub use remote::{HttpRemote, RemoteApi};
pub use services::connectivity::{ConnectivityMonitor, SyncStatus};
pub use services::sync_engine::{OutboxKind, SyncEngine, SyncStats};
