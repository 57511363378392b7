use crate::models::Collection;

/// Signals emitted by the background sync worker toward the control thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Reconciliation wrote to the local cache; views should reload.
    DataChanged,
    /// A sync pass ended, regardless of outcome.
    SyncFinished,
    SyncError(String),
    /// Interactive re-authentication is needed; never auto-triggered here.
    AuthRequired(String),
    OfflineMode,
    CollectionsLoaded {
        collections: Vec<Collection>,
        selected: String,
    },
}

/// Signals emitted by the optimistic completion coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEvent {
    /// The grace period elapsed and the local commit succeeded; the caller
    /// should now push the remote completion.
    Committed(i64),
    Undone(i64),
}
