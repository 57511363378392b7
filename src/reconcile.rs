use std::collections::HashMap;

use chrono::DateTime;

use crate::cache::{CacheStore, RemoteFields};
use crate::models::{RemoteTask, TaskRecord, Timestamp};
use crate::state::SyncState;

/// Merges a freshly fetched remote listing into the local cache for one
/// collection. Returns whether any insert, update, or delete occurred.
///
/// Remote wins for every synced field. Local records whose `remote_id`
/// vanished from the listing are deleted; locally created records that were
/// never pushed (`remote_id = None`) are untouched.
pub fn reconcile(
    cache: &CacheStore,
    collection_id: &str,
    remote: &[RemoteTask],
    fetch_state: &SyncState,
    now: Timestamp,
) -> bool {
    let local = cache.list_for_collection(collection_id);

    // A flaky partial response must not wipe local state: an empty listing is
    // only trusted when the fetch came back nominal.
    if *fetch_state != SyncState::Idle && remote.is_empty() && !local.is_empty() {
        log::debug!(
            "skipping reconcile for {collection_id}: empty payload in {fetch_state} state"
        );
        return false;
    }

    let remote_by_id: HashMap<&str, &RemoteTask> =
        remote.iter().map(|task| (task.id.as_str(), task)).collect();
    let local_by_remote: HashMap<String, TaskRecord> = local
        .into_iter()
        .filter_map(|record| record.remote_id.clone().map(|gid| (gid, record)))
        .collect();

    let mut changed = false;

    for task in remote {
        let is_done = task.is_completed();
        let completed_at = if is_done {
            task.completed
                .as_deref()
                .and_then(parse_completed_instant)
                .or(Some(now))
        } else {
            None
        };
        let fields = RemoteFields {
            title: task.title.clone(),
            is_done,
            completed_at,
            due_date: task.due,
            position: task.position.clone(),
            parent_remote_id: task.parent.clone(),
            notes: task.notes.clone(),
        };
        let (_, wrote) = cache.upsert_by_remote_id(collection_id, &task.id, fields, now);
        changed |= wrote;
    }

    for (remote_id, record) in &local_by_remote {
        if !remote_by_id.contains_key(remote_id.as_str()) {
            // Removed remotely, or outside the completed-task visibility
            // window upstream.
            if cache.delete_by_local_id(record.local_id).is_ok() {
                changed = true;
            }
        }
    }

    if changed {
        log::debug!("reconcile applied changes for {collection_id}");
    }
    changed
}

/// Remote completion instants arrive as RFC3339 strings; store the instant
/// itself (epoch seconds), local rendering is the consumer's concern.
fn parse_completed_instant(value: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::models::RemoteStatus;

    const LIST: &str = "list-1";

    fn remote(id: &str, title: &str) -> RemoteTask {
        RemoteTask {
            id: id.to_string(),
            title: title.to_string(),
            status: RemoteStatus::NeedsAction,
            collection_id: LIST.to_string(),
            due: None,
            completed: None,
            notes: String::new(),
            parent: None,
            position: None,
        }
    }

    fn completed(id: &str, title: &str, instant: Option<&str>) -> RemoteTask {
        let mut task = remote(id, title);
        task.status = RemoteStatus::Completed;
        task.completed = instant.map(|s| s.to_string());
        task
    }

    #[test]
    fn new_remote_tasks_are_inserted_once() {
        let cache = CacheStore::new();
        let listing = vec![remote("g1", "Buy milk")];

        let changed = reconcile(&cache, LIST, &listing, &SyncState::Idle, 100);
        assert!(changed);

        let records = cache.list_for_collection(LIST);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].remote_id.as_deref(), Some("g1"));
        assert_eq!(records[0].title, "Buy milk");
        assert!(!records[0].is_done);

        // Idempotence: the identical listing produces zero further mutations.
        let changed = reconcile(&cache, LIST, &listing, &SyncState::Idle, 200);
        assert!(!changed);
        assert_eq!(cache.list_for_collection(LIST).len(), 1);
    }

    #[test]
    fn remote_wins_for_every_synced_field() {
        let cache = CacheStore::new();
        reconcile(&cache, LIST, &[remote("g1", "old")], &SyncState::Idle, 100);
        cache
            .update(1, |t| t.title = "locally edited".to_string())
            .unwrap();

        let mut updated = remote("g1", "renamed upstream");
        updated.due = NaiveDate::from_ymd_opt(2024, 6, 1);
        updated.notes = "from server".to_string();
        updated.position = Some("0005".to_string());
        updated.parent = Some("g0".to_string());

        let changed = reconcile(&cache, LIST, &[updated], &SyncState::Idle, 200);
        assert!(changed);

        let record = cache.get(1).unwrap();
        assert_eq!(record.title, "renamed upstream");
        assert_eq!(record.due_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(record.notes, "from server");
        assert_eq!(record.position.as_deref(), Some("0005"));
        assert_eq!(record.parent_remote_id.as_deref(), Some("g0"));
    }

    #[test]
    fn completion_transition_uses_the_remote_instant() {
        let cache = CacheStore::new();
        reconcile(&cache, LIST, &[remote("g1", "task")], &SyncState::Idle, 100);
        assert!(!cache.get(1).unwrap().is_done);

        let listing = vec![completed("g1", "task", Some("2024-01-01T10:00:00Z"))];
        let changed = reconcile(&cache, LIST, &listing, &SyncState::Idle, 200);
        assert!(changed);

        let record = cache.get(1).unwrap();
        assert!(record.is_done);
        // 2024-01-01T10:00:00Z as epoch seconds.
        assert_eq!(record.completed_at, Some(1_704_103_200));
    }

    #[test]
    fn completion_without_remote_instant_falls_back_to_now() {
        let cache = CacheStore::new();
        reconcile(&cache, LIST, &[remote("g1", "task")], &SyncState::Idle, 100);

        let listing = vec![completed("g1", "task", None)];
        reconcile(&cache, LIST, &listing, &SyncState::Idle, 555);
        assert_eq!(cache.get(1).unwrap().completed_at, Some(555));

        // Unparseable instants degrade the same way.
        let listing = vec![completed("g2", "other", Some("not-a-timestamp"))];
        reconcile(&cache, LIST, &listing, &SyncState::Idle, 777);
        let records = cache.list_for_collection(LIST);
        let other = records
            .iter()
            .find(|r| r.remote_id.as_deref() == Some("g2"))
            .unwrap();
        assert_eq!(other.completed_at, Some(777));
    }

    #[test]
    fn reopened_tasks_clear_completed_at() {
        let cache = CacheStore::new();
        let listing = vec![completed("g1", "task", Some("2024-01-01T10:00:00Z"))];
        reconcile(&cache, LIST, &listing, &SyncState::Idle, 100);

        reconcile(&cache, LIST, &[remote("g1", "task")], &SyncState::Idle, 200);
        let record = cache.get(1).unwrap();
        assert!(!record.is_done);
        assert_eq!(record.completed_at, None);
    }

    #[test]
    fn vanished_remote_tasks_are_deleted() {
        let cache = CacheStore::new();
        let listing = vec![remote("g1", "keep"), remote("g2", "drop")];
        reconcile(&cache, LIST, &listing, &SyncState::Idle, 100);
        assert_eq!(cache.list_for_collection(LIST).len(), 2);

        let changed = reconcile(&cache, LIST, &[remote("g1", "keep")], &SyncState::Idle, 200);
        assert!(changed);
        let records = cache.list_for_collection(LIST);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].remote_id.as_deref(), Some("g1"));
    }

    #[test]
    fn pending_local_records_survive_the_deletion_sweep() {
        let cache = CacheStore::new();
        cache.insert_local_only("not pushed yet", None, LIST);
        reconcile(&cache, LIST, &[remote("g1", "remote")], &SyncState::Idle, 100);

        let records = cache.list_for_collection(LIST);
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.remote_id.is_none()));
    }

    #[test]
    fn empty_payload_guard_blocks_destructive_wipes() {
        let cache = CacheStore::new();
        reconcile(&cache, LIST, &[remote("g1", "task")], &SyncState::Idle, 100);

        // Non-nominal fetch with an empty listing: no mutation at all.
        let changed = reconcile(&cache, LIST, &[], &SyncState::OfflineReadonly, 200);
        assert!(!changed);
        assert_eq!(cache.list_for_collection(LIST).len(), 1);

        let blocked = SyncState::BlockingError("quota".to_string());
        assert!(!reconcile(&cache, LIST, &[], &blocked, 300));
        assert_eq!(cache.list_for_collection(LIST).len(), 1);

        // A nominal empty listing really does mean "everything was removed".
        let changed = reconcile(&cache, LIST, &[], &SyncState::Idle, 400);
        assert!(changed);
        assert!(cache.list_for_collection(LIST).is_empty());
    }

    #[test]
    fn empty_payload_against_empty_cache_is_a_noop() {
        let cache = CacheStore::new();
        assert!(!reconcile(&cache, LIST, &[], &SyncState::OfflineReadonly, 100));
        assert!(!reconcile(&cache, LIST, &[], &SyncState::Idle, 100));
    }

    #[test]
    fn reconcile_only_touches_the_given_collection() {
        let cache = CacheStore::new();
        let mut other = remote("g9", "other list");
        other.collection_id = "list-2".to_string();
        cache.upsert_by_remote_id(
            "list-2",
            "g9",
            RemoteFields {
                title: other.title.clone(),
                is_done: false,
                completed_at: None,
                due_date: None,
                position: None,
                parent_remote_id: None,
                notes: String::new(),
            },
            50,
        );

        reconcile(&cache, LIST, &[remote("g1", "mine")], &SyncState::Idle, 100);
        assert_eq!(cache.list_for_collection("list-2").len(), 1);
    }

    #[test]
    fn parse_completed_instant_handles_offsets() {
        assert_eq!(
            parse_completed_instant("2024-01-01T10:00:00Z"),
            Some(1_704_103_200)
        );
        assert_eq!(
            parse_completed_instant("2024-01-01T19:00:00+09:00"),
            Some(1_704_103_200)
        );
        assert_eq!(parse_completed_instant("garbage"), None);
    }
}
