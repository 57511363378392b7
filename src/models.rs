use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type Timestamp = i64;

/// Completion status as reported by the remote task service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteStatus {
    #[serde(rename = "needsAction")]
    NeedsAction,
    #[serde(rename = "completed")]
    Completed,
}

impl Default for RemoteStatus {
    fn default() -> Self {
        Self::NeedsAction
    }
}

impl RemoteStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// One task as it appears in a remote listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RemoteTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: RemoteStatus,
    pub collection_id: String,
    pub due: Option<NaiveDate>,
    /// RFC3339 completion instant; only meaningful when `status` is completed.
    pub completed: Option<String>,
    #[serde(default)]
    pub notes: String,
    /// Remote id of the parent task, when nested.
    pub parent: Option<String>,
    /// Opaque ordering token. Compared as a plain string, never interpreted.
    pub position: Option<String>,
}

impl RemoteTask {
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }
}

/// A remote task list (the unit of selection in the UI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Collection {
    pub id: String,
    pub title: String,
}

/// One row of the local cache.
///
/// `local_id` is assigned by the cache and never reused. `remote_id` stays
/// `None` until the record has been pushed to the remote service once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskRecord {
    pub local_id: i64,
    pub remote_id: Option<String>,
    pub title: String,
    pub is_done: bool,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub due_date: Option<NaiveDate>,
    pub collection_id: String,
    pub position: Option<String>,
    pub parent_remote_id: Option<String>,
    #[serde(default)]
    pub notes: String,
}

/// Aggregated per-day completion stats, written once at daily rollover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DailyLog {
    pub date: NaiveDate,
    pub total_count: u32,
    pub done_count: u32,
    pub achievement_rate: f64,
}

impl DailyLog {
    pub fn new(date: NaiveDate, total_count: u32, done_count: u32) -> Self {
        let achievement_rate = if total_count > 0 {
            f64::from(done_count) / f64::from(total_count) * 100.0
        } else {
            0.0
        };
        Self {
            date,
            total_count,
            done_count,
            achievement_rate,
        }
    }
}

/// On-disk shape of the local cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheFile {
    pub schema_version: u32,
    pub next_local_id: i64,
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub daily_logs: Vec<DailyLog>,
}
