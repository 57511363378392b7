use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDate, TimeZone, Utc};

use crate::models::{CacheFile, DailyLog, TaskRecord, Timestamp};

const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, PartialEq, Eq)]
pub enum CacheError {
    NotFound(i64),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::NotFound(local_id) => write!(f, "task {local_id} not found"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Remote-sourced field values applied during reconciliation.
///
/// The remote value always overwrites the local one; the server is the sole
/// write path once a push succeeds.
#[derive(Debug, Clone)]
pub struct RemoteFields {
    pub title: String,
    pub is_done: bool,
    pub completed_at: Option<Timestamp>,
    pub due_date: Option<NaiveDate>,
    pub position: Option<String>,
    pub parent_remote_id: Option<String>,
    pub notes: String,
}

/// The only component that touches persistent task state directly.
///
/// All mutation entry points and the reconciliation pass run on a single
/// serialized queue, so the mutex here only guards against readers on the
/// control thread racing a reconciliation in the worker.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Mutex<CacheData>>,
}

#[derive(Debug)]
struct CacheData {
    next_local_id: i64,
    tasks: Vec<TaskRecord>,
    daily_logs: Vec<DailyLog>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheData {
                next_local_id: 1,
                tasks: Vec::new(),
                daily_logs: Vec::new(),
            })),
        }
    }

    pub fn from_file(file: CacheFile) -> Self {
        // Never reuse a local id, even if the persisted counter lagged behind.
        let max_id = file.tasks.iter().map(|t| t.local_id).max().unwrap_or(0);
        let next_local_id = file.next_local_id.max(max_id + 1);
        Self {
            inner: Arc::new(Mutex::new(CacheData {
                next_local_id,
                tasks: file.tasks,
                daily_logs: file.daily_logs,
            })),
        }
    }

    pub fn to_file(&self) -> CacheFile {
        let guard = self.inner.lock().expect("cache poisoned");
        CacheFile {
            schema_version: SCHEMA_VERSION,
            next_local_id: guard.next_local_id,
            tasks: guard.tasks.clone(),
            daily_logs: guard.daily_logs.clone(),
        }
    }

    /// Inserts a record created by local user action; it stays pending
    /// (`remote_id = None`) until the push succeeds.
    pub fn insert_local_only(
        &self,
        title: &str,
        due_date: Option<NaiveDate>,
        collection_id: &str,
    ) -> TaskRecord {
        let mut guard = self.inner.lock().expect("cache poisoned");
        let record = TaskRecord {
            local_id: guard.next_local_id,
            remote_id: None,
            title: title.to_string(),
            is_done: false,
            created_at: Utc::now().timestamp(),
            completed_at: None,
            due_date,
            collection_id: collection_id.to_string(),
            position: None,
            parent_remote_id: None,
            notes: String::new(),
        };
        guard.next_local_id += 1;
        guard.tasks.push(record.clone());
        record
    }

    /// Applies remote-sourced fields to the record matching `remote_id` within
    /// the collection, inserting a new record when none exists. Returns the
    /// record and whether anything was written.
    ///
    /// `completed_at` is only touched when the completion state flips; a
    /// remote timestamp drifting on an already-done task is left alone.
    pub fn upsert_by_remote_id(
        &self,
        collection_id: &str,
        remote_id: &str,
        fields: RemoteFields,
        now: Timestamp,
    ) -> (TaskRecord, bool) {
        let mut guard = self.inner.lock().expect("cache poisoned");
        if let Some(task) = guard
            .tasks
            .iter_mut()
            .find(|t| t.collection_id == collection_id && t.remote_id.as_deref() == Some(remote_id))
        {
            let mut changed = false;
            if task.title != fields.title {
                task.title = fields.title;
                changed = true;
            }
            if task.due_date != fields.due_date {
                task.due_date = fields.due_date;
                changed = true;
            }
            if task.position != fields.position {
                task.position = fields.position;
                changed = true;
            }
            if task.parent_remote_id != fields.parent_remote_id {
                task.parent_remote_id = fields.parent_remote_id;
                changed = true;
            }
            if task.notes != fields.notes {
                task.notes = fields.notes;
                changed = true;
            }
            if task.is_done != fields.is_done {
                task.is_done = fields.is_done;
                task.completed_at = if fields.is_done {
                    fields.completed_at.or(Some(now))
                } else {
                    None
                };
                changed = true;
            }
            return (task.clone(), changed);
        }

        let record = TaskRecord {
            local_id: guard.next_local_id,
            remote_id: Some(remote_id.to_string()),
            title: fields.title,
            is_done: fields.is_done,
            created_at: now,
            completed_at: if fields.is_done {
                fields.completed_at.or(Some(now))
            } else {
                None
            },
            due_date: fields.due_date,
            collection_id: collection_id.to_string(),
            position: fields.position,
            parent_remote_id: fields.parent_remote_id,
            notes: fields.notes,
        };
        guard.next_local_id += 1;
        guard.tasks.push(record.clone());
        (record, true)
    }

    pub fn get(&self, local_id: i64) -> Result<TaskRecord, CacheError> {
        let guard = self.inner.lock().expect("cache poisoned");
        guard
            .tasks
            .iter()
            .find(|t| t.local_id == local_id)
            .cloned()
            .ok_or(CacheError::NotFound(local_id))
    }

    pub fn update<F>(&self, local_id: i64, apply: F) -> Result<TaskRecord, CacheError>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut guard = self.inner.lock().expect("cache poisoned");
        let task = guard
            .tasks
            .iter_mut()
            .find(|t| t.local_id == local_id)
            .ok_or(CacheError::NotFound(local_id))?;
        apply(task);
        Ok(task.clone())
    }

    pub fn delete_by_local_id(&self, local_id: i64) -> Result<(), CacheError> {
        let mut guard = self.inner.lock().expect("cache poisoned");
        let before = guard.tasks.len();
        guard.tasks.retain(|t| t.local_id != local_id);
        if guard.tasks.len() == before {
            return Err(CacheError::NotFound(local_id));
        }
        Ok(())
    }

    pub fn get_remote_id(&self, local_id: i64) -> Result<Option<String>, CacheError> {
        Ok(self.get(local_id)?.remote_id)
    }

    pub fn set_remote_id(&self, local_id: i64, remote_id: &str) -> Result<(), CacheError> {
        self.update(local_id, |task| {
            task.remote_id = Some(remote_id.to_string());
        })
        .map(|_| ())
    }

    /// All records for one collection, unsorted. Reconciliation lookups.
    pub fn list_for_collection(&self, collection_id: &str) -> Vec<TaskRecord> {
        let guard = self.inner.lock().expect("cache poisoned");
        guard
            .tasks
            .iter()
            .filter(|t| t.collection_id == collection_id)
            .cloned()
            .collect()
    }

    /// The display set: not-done tasks plus tasks completed on `today`.
    ///
    /// Order: not-done before done, then by position (no-position records
    /// last), then by due date, then by local id.
    pub fn list_active(&self, collection_id: &str, today: NaiveDate) -> Vec<TaskRecord> {
        let guard = self.inner.lock().expect("cache poisoned");
        let mut records: Vec<TaskRecord> = guard
            .tasks
            .iter()
            .filter(|t| {
                t.collection_id == collection_id
                    && (!t.is_done || completed_on(t.completed_at, today))
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.is_done
                .cmp(&b.is_done)
                .then_with(|| position_key(a).cmp(&position_key(b)))
                .then_with(|| a.due_date.cmp(&b.due_date))
                .then_with(|| a.local_id.cmp(&b.local_id))
        });
        records
    }

    /// (total, done) for the tasks visible on `date`: everything still open
    /// plus whatever was completed that day.
    pub fn stats_for_date(&self, collection_id: &str, date: NaiveDate) -> (u32, u32) {
        let guard = self.inner.lock().expect("cache poisoned");
        let mut total = 0u32;
        let mut done = 0u32;
        for task in guard.tasks.iter().filter(|t| t.collection_id == collection_id) {
            if task.is_done {
                if completed_on(task.completed_at, date) {
                    total += 1;
                    done += 1;
                }
            } else {
                total += 1;
            }
        }
        (total, done)
    }

    /// Upsert by date; rollover writes at most one entry per day.
    pub fn save_daily_log(&self, log: DailyLog) {
        let mut guard = self.inner.lock().expect("cache poisoned");
        if let Some(existing) = guard.daily_logs.iter_mut().find(|l| l.date == log.date) {
            *existing = log;
        } else {
            guard.daily_logs.push(log);
        }
    }

    /// The most recent `days` entries, newest first.
    pub fn recent_daily_logs(&self, days: usize) -> Vec<DailyLog> {
        let guard = self.inner.lock().expect("cache poisoned");
        let mut logs = guard.daily_logs.clone();
        logs.sort_by(|a, b| b.date.cmp(&a.date));
        logs.truncate(days);
        logs
    }

    /// All entries in `[start, end]`, newest first.
    pub fn daily_logs_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<DailyLog> {
        let guard = self.inner.lock().expect("cache poisoned");
        let mut logs: Vec<DailyLog> = guard
            .daily_logs
            .iter()
            .filter(|l| l.date >= start && l.date <= end)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.date.cmp(&a.date));
        logs
    }
}

fn completed_on(completed_at: Option<Timestamp>, date: NaiveDate) -> bool {
    completed_at
        .and_then(|ts| Local.timestamp_opt(ts, 0).single())
        .map(|dt| dt.date_naive() == date)
        .unwrap_or(false)
}

fn position_key(task: &TaskRecord) -> (bool, Option<&str>) {
    (task.position.is_none(), task.position.as_deref())
}
