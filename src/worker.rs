use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::cache::CacheStore;
use crate::events::SyncEvent;
use crate::gateway::{TaskGateway, TaskPatch};
use crate::reconcile::reconcile;
use crate::refresh::refresh;
use crate::snapshot::SnapshotCache;
use crate::state::{SyncState, SyncStateMachine};
use crate::storage::Storage;

/// Work items accepted by the sync worker. Everything the engine does against
/// the remote service goes through this queue, one item at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRequest {
    /// First sync after startup; probes availability and authentication.
    InitialSync,
    Sync,
    /// User-initiated retry out of a blocking error.
    Retry,
    PushAdd {
        local_id: i64,
    },
    PushToggle {
        local_id: i64,
        is_done: bool,
    },
    PushDetails {
        local_id: i64,
        patch: TaskPatch,
    },
    SelectCollection(String),
    Shutdown,
}

/// Owns the gateway and runs every remote interaction on one dedicated
/// thread. Requests arrive over a channel; the receive timeout doubles as the
/// periodic poll tick.
pub struct SyncWorker<G: TaskGateway> {
    gateway: G,
    cache: CacheStore,
    snapshots: SnapshotCache,
    storage: Storage,
    machine: SyncStateMachine,
    events: Sender<SyncEvent>,
    collection_id: String,
    poll_interval: Duration,
}

impl<G: TaskGateway + 'static> SyncWorker<G> {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: G,
        cache: CacheStore,
        snapshots: SnapshotCache,
        storage: Storage,
        machine: SyncStateMachine,
        events: Sender<SyncEvent>,
        collection_id: String,
    ) -> Self {
        Self {
            gateway,
            cache,
            snapshots,
            storage,
            machine,
            events,
            collection_id,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn spawn(self, requests: Receiver<SyncRequest>) -> thread::JoinHandle<()> {
        thread::spawn(move || self.run(requests))
    }

    fn run(mut self, requests: Receiver<SyncRequest>) {
        log::info!("sync worker started for collection {}", self.collection_id);
        loop {
            match requests.recv_timeout(self.poll_interval) {
                Ok(SyncRequest::Shutdown) => break,
                Ok(request) => self.handle(request),
                Err(RecvTimeoutError::Timeout) => self.try_sync(false),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("sync worker stopped");
    }

    fn handle(&mut self, request: SyncRequest) {
        match request {
            SyncRequest::InitialSync => self.initial_sync(),
            SyncRequest::Sync => self.try_sync(false),
            SyncRequest::Retry => self.try_sync(true),
            SyncRequest::PushAdd { local_id } => self.push(|worker| worker.push_add(local_id)),
            SyncRequest::PushToggle { local_id, is_done } => {
                self.push(|worker| worker.push_toggle(local_id, is_done))
            }
            SyncRequest::PushDetails { local_id, patch } => {
                self.push(move |worker| worker.push_details(local_id, &patch))
            }
            SyncRequest::SelectCollection(collection_id) => {
                self.collection_id = collection_id;
                self.try_sync(false);
            }
            // Shutdown is consumed by the run loop before dispatch.
            SyncRequest::Shutdown => {}
        }
    }

    /// Startup probe: classifies the environment before the first fetch.
    fn initial_sync(&mut self) {
        if !self.machine.try_begin_sync(true) {
            return;
        }
        if !self.gateway.is_available() {
            log::info!("gateway not configured, starting offline");
            self.machine.finish_sync(SyncState::OfflineReadonly);
            self.emit(SyncEvent::OfflineMode);
            self.sync_from_cache();
            return;
        }
        match self.gateway.authenticate() {
            Ok(true) => self.run_sync(),
            Ok(false) => {
                log::warn!("remote service unreachable during startup");
                self.machine.finish_sync(SyncState::OfflineReadonly);
                self.emit(SyncEvent::OfflineMode);
                self.sync_from_cache();
            }
            Err(err) => {
                log::warn!("silent authentication failed: {err}");
                self.machine
                    .finish_sync(SyncState::BlockingError(err.message.clone()));
                self.emit(SyncEvent::AuthRequired(err.message));
                self.emit(SyncEvent::SyncFinished);
            }
        }
    }

    fn try_sync(&mut self, explicit_retry: bool) {
        if !self.machine.try_begin_sync(explicit_retry) {
            log::debug!("sync skipped in state {}", self.machine.current());
            return;
        }
        self.run_sync();
    }

    /// One full pass: fetch, reconcile, persist. The state machine must
    /// already be claimed.
    fn run_sync(&mut self) {
        let outcome = refresh(&self.gateway, &self.snapshots, &self.collection_id);
        if !outcome.collections.is_empty() {
            self.emit(SyncEvent::CollectionsLoaded {
                collections: outcome.collections.clone(),
                selected: self.collection_id.clone(),
            });
        }

        let now = Utc::now().timestamp();
        let changed = reconcile(
            &self.cache,
            &self.collection_id,
            &outcome.tasks,
            &outcome.state,
            now,
        );

        match &outcome.state {
            SyncState::OfflineReadonly => self.emit(SyncEvent::OfflineMode),
            SyncState::BlockingError(message) => self.emit(SyncEvent::SyncError(message.clone())),
            _ => {}
        }
        self.machine.finish_sync(outcome.state);

        if changed {
            self.persist();
            self.emit(SyncEvent::DataChanged);
        }
        self.emit(SyncEvent::SyncFinished);
    }

    /// Offline startup still has to surface whatever the snapshot holds.
    fn sync_from_cache(&mut self) {
        let outcome = refresh(&self.gateway, &self.snapshots, &self.collection_id);
        if !outcome.collections.is_empty() {
            self.emit(SyncEvent::CollectionsLoaded {
                collections: outcome.collections,
                selected: self.collection_id.clone(),
            });
        }
        if outcome.from_cache {
            let now = Utc::now().timestamp();
            if reconcile(
                &self.cache,
                &self.collection_id,
                &outcome.tasks,
                &outcome.state,
                now,
            ) {
                self.persist();
                self.emit(SyncEvent::DataChanged);
            }
        }
        self.emit(SyncEvent::SyncFinished);
    }

    /// The op reports whether the follow-up fetch should run; a failed
    /// remote create ends the pass early instead of polling.
    fn push<F: FnOnce(&mut Self) -> bool>(&mut self, op: F) {
        if !self.machine.try_begin_sync(false) {
            log::warn!("push dropped in state {}", self.machine.current());
            self.emit(SyncEvent::SyncError(
                "change could not be sent right now".to_string(),
            ));
            self.emit(SyncEvent::SyncFinished);
            return;
        }
        if op(self) {
            self.run_sync();
        } else {
            self.machine.finish_sync(SyncState::Idle);
            self.emit(SyncEvent::SyncFinished);
        }
    }

    fn push_add(&mut self, local_id: i64) -> bool {
        let record = match self.cache.get(local_id) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("push_add: {err}");
                return false;
            }
        };
        if record.remote_id.is_some() {
            return true;
        }
        match self
            .gateway
            .add_task(&record.title, record.due_date, &self.collection_id)
        {
            Some(remote) => {
                if let Err(err) = self.cache.set_remote_id(local_id, &remote.id) {
                    log::warn!("push_add: {err}");
                    return false;
                }
                self.persist();
                true
            }
            None => {
                // The record stays pending and is retried on a later push.
                log::warn!("remote create failed for local task {local_id}");
                self.emit(SyncEvent::SyncError(
                    "task could not be created remotely".to_string(),
                ));
                false
            }
        }
    }

    fn push_toggle(&mut self, local_id: i64, is_done: bool) -> bool {
        let remote_id = match self.cache.get_remote_id(local_id) {
            Ok(Some(remote_id)) => remote_id,
            Ok(None) => {
                log::debug!("toggle for unpushed task {local_id}, nothing to send");
                return true;
            }
            Err(err) => {
                log::warn!("push_toggle: {err}");
                return false;
            }
        };
        let ok = if is_done {
            self.gateway.complete_task(&remote_id, &self.collection_id)
        } else {
            self.gateway.reopen_task(&remote_id, &self.collection_id)
        };
        if !ok {
            log::warn!("remote toggle failed for {remote_id}");
            self.emit(SyncEvent::SyncError(
                "task state could not be updated remotely".to_string(),
            ));
        }
        // The follow-up fetch reconciles either way; remote wins.
        true
    }

    fn push_details(&mut self, local_id: i64, patch: &TaskPatch) -> bool {
        if patch.is_empty() {
            return true;
        }
        let remote_id = match self.cache.get_remote_id(local_id) {
            Ok(Some(remote_id)) => remote_id,
            Ok(None) => {
                log::debug!("edit for unpushed task {local_id}, nothing to send");
                return true;
            }
            Err(err) => {
                log::warn!("push_details: {err}");
                return false;
            }
        };
        if self
            .gateway
            .update_task(&remote_id, patch, &self.collection_id)
            .is_none()
        {
            log::warn!("remote update failed for {remote_id}");
            self.emit(SyncEvent::SyncError(
                "task could not be updated remotely".to_string(),
            ));
        }
        true
    }

    fn persist(&self) {
        if let Err(err) = self.storage.save_cache(&self.cache.to_file()) {
            log::error!("failed to persist cache: {err}");
        }
    }

    fn emit(&self, event: SyncEvent) {
        // The receiving side going away only matters at shutdown.
        let _ = self.events.send(event);
    }
}
