use std::sync::{Arc, Mutex};

/// The four operating modes governing what the rest of the application may do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Nominal: read-write, last sync succeeded or none attempted yet.
    Idle,
    /// A sync is in flight; all mutation entry points are rejected.
    Syncing,
    /// Gateway unavailable or unauthenticated; serving cached data read-only.
    OfflineReadonly,
    /// Sync failed in a way retrying silently won't fix; read-only with an
    /// actionable message.
    BlockingError(String),
}

impl SyncState {
    pub fn is_read_only(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }

    fn label(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::OfflineReadonly => "offline_readonly",
            SyncState::BlockingError(_) => "blocking_error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::BlockingError(message) => write!(f, "blocking_error: {message}"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Shared handle to the machine; cloned between the control thread and the
/// sync worker. Runs for the life of the process, no terminal state.
#[derive(Clone)]
pub struct SyncStateMachine {
    inner: Arc<Mutex<SyncState>>,
}

impl Default for SyncStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SyncState::Idle)),
        }
    }

    pub fn current(&self) -> SyncState {
        self.inner.lock().expect("sync state poisoned").clone()
    }

    /// Mutations (add/edit/toggle/delete) are permitted only in `Idle`. The
    /// caller must retry once back in `Idle`; nothing is queued.
    pub fn allows_mutation(&self) -> bool {
        matches!(*self.inner.lock().expect("sync state poisoned"), SyncState::Idle)
    }

    /// Claims the machine for a sync pass, moving to `Syncing`.
    ///
    /// Allowed from `Idle` and `OfflineReadonly`; from `BlockingError` only
    /// when `explicit_retry` is set. Returns false (and leaves the state
    /// untouched) when a sync is already in flight or the error is sticky.
    pub fn try_begin_sync(&self, explicit_retry: bool) -> bool {
        let mut guard = self.inner.lock().expect("sync state poisoned");
        match &*guard {
            SyncState::Idle | SyncState::OfflineReadonly => {}
            SyncState::BlockingError(_) if explicit_retry => {}
            SyncState::Syncing | SyncState::BlockingError(_) => return false,
        }
        *guard = SyncState::Syncing;
        true
    }

    /// Records the outcome of the in-flight sync pass.
    pub fn finish_sync(&self, outcome: SyncState) {
        let mut guard = self.inner.lock().expect("sync state poisoned");
        // A sync never ends in Syncing; normalize a stray value to Idle.
        let next = if outcome == SyncState::Syncing {
            SyncState::Idle
        } else {
            outcome
        };
        if *guard != next {
            log::info!("sync state {} -> {}", guard.label(), next.label());
        }
        *guard = next;
    }
}
