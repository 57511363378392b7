use serde::{Deserialize, Serialize};

use crate::gateway::TaskGateway;
use crate::models::{Collection, RemoteTask};
use crate::snapshot::SnapshotCache;
use crate::state::SyncState;

pub const COLLECTIONS_SNAPSHOT: &str = "collections";

/// Snapshot payload for the collection listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionsPayload {
    #[serde(default)]
    pub items: Vec<Collection>,
}

/// Snapshot payload for one collection's task listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksPayload {
    #[serde(default)]
    pub items: Vec<RemoteTask>,
}

/// What a fetch pass produced and the operating mode it leaves us in.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub state: SyncState,
    pub collections: Vec<Collection>,
    pub tasks: Vec<RemoteTask>,
    /// Listings came from a snapshot, not the live service.
    pub from_cache: bool,
}

impl RefreshOutcome {
    fn live(collections: Vec<Collection>, tasks: Vec<RemoteTask>) -> Self {
        Self {
            state: SyncState::Idle,
            collections,
            tasks,
            from_cache: false,
        }
    }

    fn cached(collections: Vec<Collection>, tasks: Vec<RemoteTask>) -> Self {
        Self {
            state: SyncState::OfflineReadonly,
            collections,
            tasks,
            from_cache: true,
        }
    }

    fn blocked(message: &str) -> Self {
        Self {
            state: SyncState::BlockingError(message.to_string()),
            collections: Vec::new(),
            tasks: Vec::new(),
            from_cache: false,
        }
    }
}

pub fn tasks_snapshot_name(collection_id: &str) -> String {
    format!("tasks_{collection_id}")
}

/// Fetches the collection and task listings, falling back to the snapshot
/// store when the gateway is unavailable or returns nothing.
///
/// Outcome states: `Idle` on a live fetch, `OfflineReadonly` when serving a
/// snapshot, `BlockingError` when there is nothing to show at all. Snapshot
/// writes are best effort; a failed write downgrades nothing.
pub fn refresh<G: TaskGateway>(
    gateway: &G,
    snapshots: &SnapshotCache,
    collection_id: &str,
) -> RefreshOutcome {
    if !gateway.is_available() {
        log::info!("gateway unavailable, serving snapshot for {collection_id}");
        return from_snapshots(snapshots, collection_id, "remote service is not configured");
    }

    let collections = gateway.list_collections();
    let tasks = gateway.list_tasks(collection_id, true, true);
    if collections.is_empty() && tasks.is_empty() {
        // A reachable service reports at least one collection; both listings
        // coming back empty is a failed fetch in disguise.
        log::warn!("both listings came back empty, falling back to snapshot");
        return from_snapshots(snapshots, collection_id, "could not reach the remote service");
    }

    let payload = CollectionsPayload {
        items: collections.clone(),
    };
    if let Err(err) = snapshots.save(COLLECTIONS_SNAPSHOT, &payload) {
        log::warn!("failed to save collections snapshot: {err}");
    }
    let payload = TasksPayload {
        items: tasks.clone(),
    };
    if let Err(err) = snapshots.save(&tasks_snapshot_name(collection_id), &payload) {
        log::warn!("failed to save tasks snapshot for {collection_id}: {err}");
    }

    RefreshOutcome::live(collections, tasks)
}

fn from_snapshots(
    snapshots: &SnapshotCache,
    collection_id: &str,
    no_cache_message: &str,
) -> RefreshOutcome {
    let collections = snapshots
        .load::<CollectionsPayload>(COLLECTIONS_SNAPSHOT)
        .map(|s| s.payload.items)
        .unwrap_or_default();
    let tasks = snapshots
        .load::<TasksPayload>(&tasks_snapshot_name(collection_id))
        .map(|s| s.payload.items);

    match tasks {
        Some(tasks) => RefreshOutcome::cached(collections, tasks),
        None if !collections.is_empty() => RefreshOutcome::cached(collections, Vec::new()),
        None => RefreshOutcome::blocked(no_cache_message),
    }
}
