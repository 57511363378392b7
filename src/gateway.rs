use chrono::NaiveDate;

use crate::models::{Collection, RemoteStatus, RemoteTask};

/// Stored credentials are invalid or expired and cannot be refreshed without
/// interactive re-authentication. The one failure mode that crosses the
/// gateway boundary as an error, because it needs a different UI affordance
/// than a generic retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequiredError {
    pub message: String,
}

impl AuthRequiredError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for AuthRequiredError {
    fn default() -> Self {
        Self::new("stored credentials expired; re-authentication required")
    }
}

impl std::fmt::Display for AuthRequiredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AuthRequiredError {}

/// Partial update sent to the remote service. Unset fields are left alone;
/// `due` distinguishes "leave" (outer `None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<RemoteStatus>,
    pub due: Option<Option<NaiveDate>>,
    pub notes: Option<String>,
}

impl TaskPatch {
    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn status(mut self, status: RemoteStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn due(mut self, due: Option<NaiveDate>) -> Self {
        self.due = Some(due);
        self
    }

    pub fn notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.status.is_none() && self.due.is_none() && self.notes.is_none()
    }
}

/// Capability interface over the remote task collection.
///
/// Expected failures (network, quota) never cross this boundary as errors:
/// listings come back empty, mutations come back `None`/`false`, and the
/// engine treats that as "no change, try again later". Only
/// [`AuthRequiredError`] is surfaced distinctly, from `authenticate`.
pub trait TaskGateway: Send {
    /// Configuration/credential presence check only; no network call.
    fn is_available(&self) -> bool;

    /// Silent (non-interactive) authentication. `Ok(false)` means the remote
    /// side is unreachable right now; `Err` means the user must re-auth.
    fn authenticate(&self) -> Result<bool, AuthRequiredError>;

    fn list_collections(&self) -> Vec<Collection>;

    fn list_tasks(
        &self,
        collection_id: &str,
        include_completed: bool,
        include_hidden: bool,
    ) -> Vec<RemoteTask>;

    fn add_task(
        &self,
        title: &str,
        due_date: Option<NaiveDate>,
        collection_id: &str,
    ) -> Option<RemoteTask>;

    fn update_task(
        &self,
        remote_id: &str,
        patch: &TaskPatch,
        collection_id: &str,
    ) -> Option<RemoteTask>;

    fn complete_task(&self, remote_id: &str, collection_id: &str) -> bool {
        let patch = TaskPatch::default().status(RemoteStatus::Completed);
        self.update_task(remote_id, &patch, collection_id).is_some()
    }

    fn reopen_task(&self, remote_id: &str, collection_id: &str) -> bool {
        let patch = TaskPatch::default().status(RemoteStatus::NeedsAction);
        self.update_task(remote_id, &patch, collection_id).is_some()
    }

    fn update_title(&self, remote_id: &str, new_title: &str, collection_id: &str) -> bool {
        let patch = TaskPatch::default().title(new_title);
        self.update_task(remote_id, &patch, collection_id).is_some()
    }

    fn update_due_date(
        &self,
        remote_id: &str,
        due_date: Option<NaiveDate>,
        collection_id: &str,
    ) -> bool {
        let patch = TaskPatch::default().due(due_date);
        self.update_task(remote_id, &patch, collection_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingGateway {
        patches: Mutex<Vec<(String, TaskPatch)>>,
        fail: bool,
    }

    impl RecordingGateway {
        fn new(fail: bool) -> Self {
            Self {
                patches: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    impl TaskGateway for RecordingGateway {
        fn is_available(&self) -> bool {
            true
        }

        fn authenticate(&self) -> Result<bool, AuthRequiredError> {
            Ok(true)
        }

        fn list_collections(&self) -> Vec<Collection> {
            Vec::new()
        }

        fn list_tasks(&self, _: &str, _: bool, _: bool) -> Vec<RemoteTask> {
            Vec::new()
        }

        fn add_task(&self, _: &str, _: Option<NaiveDate>, _: &str) -> Option<RemoteTask> {
            None
        }

        fn update_task(
            &self,
            remote_id: &str,
            patch: &TaskPatch,
            collection_id: &str,
        ) -> Option<RemoteTask> {
            self.patches
                .lock()
                .unwrap()
                .push((remote_id.to_string(), patch.clone()));
            if self.fail {
                return None;
            }
            Some(RemoteTask {
                id: remote_id.to_string(),
                title: "task".to_string(),
                status: patch.status.unwrap_or_default(),
                collection_id: collection_id.to_string(),
                due: None,
                completed: None,
                notes: String::new(),
                parent: None,
                position: None,
            })
        }
    }

    #[test]
    fn convenience_wrappers_route_through_update_task() {
        let gateway = RecordingGateway::new(false);

        assert!(gateway.complete_task("g1", "list-1"));
        assert!(gateway.reopen_task("g1", "list-1"));
        assert!(gateway.update_title("g1", "renamed", "list-1"));
        let due = NaiveDate::from_ymd_opt(2024, 6, 1);
        assert!(gateway.update_due_date("g1", due, "list-1"));
        assert!(gateway.update_due_date("g1", None, "list-1"));

        let patches = gateway.patches.lock().unwrap();
        assert_eq!(patches.len(), 5);
        assert_eq!(patches[0].1.status, Some(RemoteStatus::Completed));
        assert_eq!(patches[1].1.status, Some(RemoteStatus::NeedsAction));
        assert_eq!(patches[2].1.title.as_deref(), Some("renamed"));
        assert_eq!(patches[3].1.due, Some(due));
        // Clearing the due date is an explicit Some(None), not an omission.
        assert_eq!(patches[4].1.due, Some(None));
    }

    #[test]
    fn wrappers_report_failure_as_false() {
        let gateway = RecordingGateway::new(true);
        assert!(!gateway.complete_task("g1", "list-1"));
        assert!(!gateway.update_title("g1", "renamed", "list-1"));
    }

    #[test]
    fn empty_patch_is_detectable() {
        assert!(TaskPatch::default().is_empty());
        assert!(!TaskPatch::default().title("x").is_empty());
    }
}
