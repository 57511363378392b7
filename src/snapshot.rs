use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::Timestamp;
use crate::storage::StorageError;

/// Named wrapper persisted for each snapshot entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Snapshot<T> {
    pub cached_at: Timestamp,
    pub payload: T,
}

/// Last-known-good remote listings, kept for offline display.
///
/// Written opportunistically after every successful remote listing; read only
/// when the gateway is unreachable. A missing or corrupt entry is simply
/// absent, never an error.
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn save<T: Serialize>(&self, name: &str, payload: &T) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let wrapper = Snapshot {
            cached_at: Utc::now().timestamp(),
            payload,
        };
        let path = self.path(name);
        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(&wrapper)?;
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(temp_path, path)?;
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Option<Snapshot<T>> {
        let path = self.path(name);
        if !path.exists() {
            return None;
        }
        let buf = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&buf) {
            Ok(wrapper) => Some(wrapper),
            Err(err) => {
                log::warn!("discarding corrupt snapshot {}: {err}", path.display());
                None
            }
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        // Collection ids may contain path separators.
        let safe_name = name.replace(['/', '\\'], "_");
        self.dir.join(format!("{safe_name}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_then_load_returns_wrapper_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().join("cache"));

        cache
            .save("tasks_list-1", &json!({"items": [{"id": "g1"}]}))
            .unwrap();

        let snapshot: Snapshot<serde_json::Value> = cache.load("tasks_list-1").unwrap();
        assert!(snapshot.cached_at > 0);
        assert_eq!(snapshot.payload["items"][0]["id"], "g1");
    }

    #[test]
    fn load_returns_none_for_missing_or_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().to_path_buf());

        assert!(cache.load::<serde_json::Value>("absent").is_none());

        std::fs::write(dir.path().join("broken.json"), b"{oops").unwrap();
        assert!(cache.load::<serde_json::Value>("broken").is_none());
    }

    #[test]
    fn entry_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().to_path_buf());

        cache.save("tasks_a/b", &json!({})).unwrap();
        assert!(dir.path().join("tasks_a_b.json").exists());
        assert!(cache.load::<serde_json::Value>("tasks_a/b").is_some());
    }
}
