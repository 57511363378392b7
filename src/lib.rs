//! Sync engine for a task app that mirrors a remote task service into a
//! local cache.
//!
//! The remote service is the source of truth. A background worker fetches
//! listings, reconciles them into the cache (remote wins), and pushes local
//! changes; the control thread reads and mutates through [`TaskService`],
//! gated by the four-state [`SyncState`] machine. Completing a task goes
//! through the [`CompletionCoordinator`], which holds the change for a short
//! undo window before committing it.

pub mod cache;
pub mod daily;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod reconcile;
pub mod refresh;
pub mod rest;
pub mod service;
pub mod snapshot;
pub mod state;
pub mod storage;
pub mod undo;
pub mod worker;

pub use cache::{CacheError, CacheStore, RemoteFields};
pub use daily::DailyRollover;
pub use events::{CompletionEvent, SyncEvent};
pub use gateway::{AuthRequiredError, TaskGateway, TaskPatch};
pub use models::{CacheFile, Collection, DailyLog, RemoteStatus, RemoteTask, TaskRecord, Timestamp};
pub use reconcile::reconcile;
pub use refresh::{refresh, RefreshOutcome};
pub use rest::RestGateway;
pub use service::{ServiceError, TaskService};
pub use snapshot::{Snapshot, SnapshotCache};
pub use state::{SyncState, SyncStateMachine};
pub use storage::{Storage, StorageError};
pub use undo::{CommitFn, CompletionCoordinator};
pub use worker::{SyncRequest, SyncWorker};
