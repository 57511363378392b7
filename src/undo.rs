use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::events::CompletionEvent;

/// Local commit callback; returns whether the record was actually marked done.
pub type CommitFn = Arc<dyn Fn(i64) -> bool + Send + Sync>;

/// Defers a user-initiated "complete" so it can be undone before anything is
/// pushed remotely.
///
/// Each queued task id arms a one-shot timer; queueing again replaces the
/// pending timer, and `cancel` aborts it. On expiry the local commit callback
/// runs and, only if it reports success, [`CompletionEvent::Committed`] is
/// emitted - the caller's cue to push the remote completion.
///
/// Timers run on the caller's tokio runtime; `queue` must be called from
/// within one.
pub struct CompletionCoordinator {
    delay: Duration,
    commit: CommitFn,
    events: Sender<CompletionEvent>,
    pending: Arc<Mutex<HashMap<i64, JoinHandle<()>>>>,
}

impl CompletionCoordinator {
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(2_000);

    pub fn new(delay: Duration, commit: CommitFn, events: Sender<CompletionEvent>) -> Self {
        Self {
            delay,
            commit,
            events,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_default_delay(commit: CommitFn, events: Sender<CompletionEvent>) -> Self {
        Self::new(Self::DEFAULT_DELAY, commit, events)
    }

    /// Arms the deferred commit for `local_id`, replacing any pending timer
    /// for the same id (the replaced one signals `Undone` first).
    pub fn queue(&self, local_id: i64) {
        self.cancel(local_id);

        let delay = self.delay;
        let commit = Arc::clone(&self.commit);
        let events = self.events.clone();
        let pending = Arc::clone(&self.pending);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Remove ourselves first: a cancel arriving after this point is a
            // no-op because the timer no longer exists.
            if pending.lock().expect("pending map poisoned").remove(&local_id).is_none() {
                return;
            }
            if (commit)(local_id) {
                let _ = events.send(CompletionEvent::Committed(local_id));
            }
        });

        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(local_id, handle);
    }

    /// Aborts the pending commit for `local_id`, if any. Returns whether a
    /// timer was actually cancelled; calling after expiry is a no-op.
    pub fn cancel(&self, local_id: i64) -> bool {
        let handle = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .remove(&local_id);
        match handle {
            Some(handle) => {
                handle.abort();
                let _ = self.events.send(CompletionEvent::Undone(local_id));
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }
}
