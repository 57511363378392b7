use std::sync::mpsc::{SendError, Sender};
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDate, Utc};

use crate::cache::{CacheError, CacheStore};
use crate::gateway::TaskPatch;
use crate::models::{DailyLog, TaskRecord};
use crate::state::{SyncState, SyncStateMachine};
use crate::storage::{Storage, StorageError};
use crate::undo::CommitFn;
use crate::worker::SyncRequest;

#[derive(Debug)]
pub enum ServiceError {
    /// The engine is not in `Idle`; the mutation was rejected, nothing queued.
    ReadOnly(SyncState),
    NotFound(i64),
    EmptyTitle,
    Storage(StorageError),
    /// The sync worker is gone; the process is shutting down.
    Disconnected,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::ReadOnly(state) => write!(f, "read-only while {state}"),
            ServiceError::NotFound(local_id) => write!(f, "task {local_id} not found"),
            ServiceError::EmptyTitle => write!(f, "task title must not be empty"),
            ServiceError::Storage(err) => write!(f, "storage error: {err}"),
            ServiceError::Disconnected => write!(f, "sync worker is not running"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<CacheError> for ServiceError {
    fn from(value: CacheError) -> Self {
        match value {
            CacheError::NotFound(local_id) => ServiceError::NotFound(local_id),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(value: StorageError) -> Self {
        ServiceError::Storage(value)
    }
}

impl From<SendError<SyncRequest>> for ServiceError {
    fn from(_: SendError<SyncRequest>) -> Self {
        ServiceError::Disconnected
    }
}

/// Control-thread entry point for everything the UI does with tasks.
///
/// Mutations apply to the local cache immediately, persist, and queue the
/// matching push for the sync worker. Every mutation is gated on the state
/// machine: outside `Idle` it fails with [`ServiceError::ReadOnly`] and
/// leaves the cache untouched.
pub struct TaskService {
    cache: CacheStore,
    storage: Storage,
    machine: SyncStateMachine,
    requests: Sender<SyncRequest>,
    collection_id: Mutex<String>,
}

impl TaskService {
    pub fn new(
        cache: CacheStore,
        storage: Storage,
        machine: SyncStateMachine,
        requests: Sender<SyncRequest>,
        collection_id: String,
    ) -> Self {
        Self {
            cache,
            storage,
            machine,
            requests,
            collection_id: Mutex::new(collection_id),
        }
    }

    pub fn add_task(
        &self,
        title: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<TaskRecord, ServiceError> {
        self.ensure_writable()?;
        let title = title.trim();
        if title.is_empty() {
            return Err(ServiceError::EmptyTitle);
        }
        let record = self
            .cache
            .insert_local_only(title, due_date, &self.collection_id());
        self.persist()?;
        self.requests.send(SyncRequest::PushAdd {
            local_id: record.local_id,
        })?;
        Ok(record)
    }

    /// Sets the completion state outright; `toggle_task` flips it.
    pub fn set_done(&self, local_id: i64, is_done: bool) -> Result<TaskRecord, ServiceError> {
        self.ensure_writable()?;
        let now = Utc::now().timestamp();
        let record = self.cache.update(local_id, |task| {
            task.is_done = is_done;
            task.completed_at = if is_done { Some(now) } else { None };
        })?;
        self.persist()?;
        if record.remote_id.is_some() {
            self.requests
                .send(SyncRequest::PushToggle { local_id, is_done })?;
        }
        Ok(record)
    }

    pub fn toggle_task(&self, local_id: i64) -> Result<TaskRecord, ServiceError> {
        let current = self.cache.get(local_id)?;
        self.set_done(local_id, !current.is_done)
    }

    /// Edits title, due date, or notes. The patch's status field is ignored;
    /// completion goes through `set_done`.
    pub fn update_details(
        &self,
        local_id: i64,
        patch: &TaskPatch,
    ) -> Result<TaskRecord, ServiceError> {
        self.ensure_writable()?;
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(ServiceError::EmptyTitle);
            }
        }
        let record = self.cache.update(local_id, |task| {
            if let Some(title) = &patch.title {
                task.title = title.trim().to_string();
            }
            if let Some(due) = patch.due {
                task.due_date = due;
            }
            if let Some(notes) = &patch.notes {
                task.notes = notes.clone();
            }
        })?;
        self.persist()?;
        let mut push = patch.clone();
        push.status = None;
        if !push.is_empty() {
            self.requests.send(SyncRequest::PushDetails {
                local_id,
                patch: push,
            })?;
        }
        Ok(record)
    }

    /// Removes the record from the local cache only. There is no remote
    /// delete; a record the server still lists comes back on the next sync.
    pub fn delete_task(&self, local_id: i64) -> Result<(), ServiceError> {
        self.ensure_writable()?;
        self.cache.delete_by_local_id(local_id)?;
        self.persist()?;
        Ok(())
    }

    /// Today's visible tasks for the selected collection, display order.
    pub fn list_active(&self) -> Vec<TaskRecord> {
        self.cache
            .list_active(&self.collection_id(), Local::now().date_naive())
    }

    pub fn recent_daily_logs(&self, days: usize) -> Vec<DailyLog> {
        self.cache.recent_daily_logs(days)
    }

    pub fn sync_state(&self) -> SyncState {
        self.machine.current()
    }

    pub fn request_sync(&self) -> Result<(), ServiceError> {
        self.requests.send(SyncRequest::Sync)?;
        Ok(())
    }

    /// User-initiated retry out of a blocking error.
    pub fn retry(&self) -> Result<(), ServiceError> {
        self.requests.send(SyncRequest::Retry)?;
        Ok(())
    }

    pub fn select_collection(&self, collection_id: &str) -> Result<(), ServiceError> {
        *self
            .collection_id
            .lock()
            .expect("collection id poisoned") = collection_id.to_string();
        self.requests
            .send(SyncRequest::SelectCollection(collection_id.to_string()))?;
        Ok(())
    }

    pub fn collection_id(&self) -> String {
        self.collection_id
            .lock()
            .expect("collection id poisoned")
            .clone()
    }

    /// Commit callback for the completion coordinator: marks the task done
    /// locally and queues the remote push, reporting success as a bool.
    pub fn commit_fn(self: &Arc<Self>) -> CommitFn {
        let service = Arc::clone(self);
        Arc::new(move |local_id| match service.set_done(local_id, true) {
            Ok(_) => true,
            Err(err) => {
                log::warn!("deferred completion of task {local_id} failed: {err}");
                false
            }
        })
    }

    fn ensure_writable(&self) -> Result<(), ServiceError> {
        if self.machine.allows_mutation() {
            Ok(())
        } else {
            Err(ServiceError::ReadOnly(self.machine.current()))
        }
    }

    fn persist(&self) -> Result<(), ServiceError> {
        self.storage.save_cache(&self.cache.to_file())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct Fixture {
        service: Arc<TaskService>,
        cache: CacheStore,
        machine: SyncStateMachine,
        requests: mpsc::Receiver<SyncRequest>,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new();
        let machine = SyncStateMachine::new();
        let (tx, rx) = mpsc::channel();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.ensure_dirs().unwrap();
        let service = Arc::new(TaskService::new(
            cache.clone(),
            storage,
            machine.clone(),
            tx,
            "list-1".to_string(),
        ));
        Fixture {
            service,
            cache,
            machine,
            requests: rx,
            dir,
        }
    }

    #[test]
    fn add_task_persists_and_queues_the_push() {
        let fx = fixture();
        let record = fx.service.add_task("  Buy milk  ", None).unwrap();
        assert_eq!(record.title, "Buy milk");
        assert!(record.remote_id.is_none());

        assert_eq!(
            fx.requests.try_recv().unwrap(),
            SyncRequest::PushAdd {
                local_id: record.local_id
            }
        );
        assert!(fx.dir.path().join("cache.json").exists());
    }

    #[test]
    fn blank_titles_are_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.service.add_task("   ", None),
            Err(ServiceError::EmptyTitle)
        ));
        assert!(fx.cache.list_for_collection("list-1").is_empty());
    }

    #[test]
    fn mutations_are_rejected_outside_idle() {
        let fx = fixture();
        let record = fx.service.add_task("task", None).unwrap();
        fx.requests.try_recv().unwrap();

        for state in [
            SyncState::Syncing,
            SyncState::OfflineReadonly,
            SyncState::BlockingError("quota".to_string()),
        ] {
            fx.machine.try_begin_sync(true);
            fx.machine.finish_sync(state.clone());

            assert!(matches!(
                fx.service.add_task("another", None),
                Err(ServiceError::ReadOnly(_))
            ));
            assert!(matches!(
                fx.service.toggle_task(record.local_id),
                Err(ServiceError::ReadOnly(_))
            ));
            assert!(matches!(
                fx.service.delete_task(record.local_id),
                Err(ServiceError::ReadOnly(_))
            ));

            // Nothing changed, nothing was queued.
            assert_eq!(fx.cache.list_for_collection("list-1").len(), 1);
            assert!(!fx.cache.get(record.local_id).unwrap().is_done);
            assert!(fx.requests.try_recv().is_err());
        }
    }

    #[test]
    fn toggle_sets_completed_at_and_queues_push_for_synced_tasks() {
        let fx = fixture();
        let record = fx.service.add_task("task", None).unwrap();
        fx.requests.try_recv().unwrap();
        fx.cache.set_remote_id(record.local_id, "g1").unwrap();

        let done = fx.service.toggle_task(record.local_id).unwrap();
        assert!(done.is_done);
        assert!(done.completed_at.is_some());
        assert_eq!(
            fx.requests.try_recv().unwrap(),
            SyncRequest::PushToggle {
                local_id: record.local_id,
                is_done: true
            }
        );

        let reopened = fx.service.toggle_task(record.local_id).unwrap();
        assert!(!reopened.is_done);
        assert_eq!(reopened.completed_at, None);
    }

    #[test]
    fn toggle_on_unpushed_task_stays_local() {
        let fx = fixture();
        let record = fx.service.add_task("task", None).unwrap();
        fx.requests.try_recv().unwrap();

        fx.service.toggle_task(record.local_id).unwrap();
        // No remote id yet, so no push is queued.
        assert!(fx.requests.try_recv().is_err());
    }

    #[test]
    fn update_details_edits_locally_and_pushes_without_status() {
        let fx = fixture();
        let record = fx.service.add_task("old", None).unwrap();
        fx.requests.try_recv().unwrap();

        let due = NaiveDate::from_ymd_opt(2024, 6, 1);
        let patch = TaskPatch::default().title(" new ").due(due).notes("detail");
        let updated = fx.service.update_details(record.local_id, &patch).unwrap();
        assert_eq!(updated.title, "new");
        assert_eq!(updated.due_date, due);
        assert_eq!(updated.notes, "detail");

        match fx.requests.try_recv().unwrap() {
            SyncRequest::PushDetails { local_id, patch } => {
                assert_eq!(local_id, record.local_id);
                assert!(patch.status.is_none());
                assert_eq!(patch.due, Some(due));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn delete_is_local_only() {
        let fx = fixture();
        let record = fx.service.add_task("task", None).unwrap();
        fx.requests.try_recv().unwrap();

        fx.service.delete_task(record.local_id).unwrap();
        assert!(fx.cache.list_for_collection("list-1").is_empty());
        // No push of any kind.
        assert!(fx.requests.try_recv().is_err());

        assert!(matches!(
            fx.service.delete_task(record.local_id),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn select_collection_routes_future_work_to_the_new_target() {
        let fx = fixture();
        fx.service.select_collection("list-2").unwrap();
        assert_eq!(fx.service.collection_id(), "list-2");
        assert_eq!(
            fx.requests.try_recv().unwrap(),
            SyncRequest::SelectCollection("list-2".to_string())
        );

        let record = fx.service.add_task("routed", None).unwrap();
        assert_eq!(record.collection_id, "list-2");
    }

    #[test]
    fn commit_fn_marks_done_and_reports_read_only_as_failure() {
        let fx = fixture();
        let record = fx.service.add_task("task", None).unwrap();
        fx.requests.try_recv().unwrap();

        let commit = fx.service.commit_fn();
        assert!(commit(record.local_id));
        assert!(fx.cache.get(record.local_id).unwrap().is_done);

        fx.machine.try_begin_sync(false);
        assert!(!commit(record.local_id));
    }

    #[test]
    fn disconnected_worker_surfaces_as_an_error() {
        let fx = fixture();
        drop(fx.requests);
        assert!(matches!(
            fx.service.add_task("task", None),
            Err(ServiceError::Disconnected)
        ));
    }
}
