use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Flat-file JSON cache: one file per key under `dir`, aged by mtime.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Age of the entry, `None` when it does not exist.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let modified = fs::metadata(self.path(key)).ok()?.modified().ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    pub fn is_expired(&self, age: Duration) -> bool {
        age > self.ttl
    }

    /// Reads a non-expired entry. Missing, expired and unparsable entries are all misses.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let age = self.age(key)?;
        if self.is_expired(age) {
            info!("Cache expired for {} (age {}s)", key, age.as_secs());
            return None;
        }
        self.read(key)
    }

    /// Reads an entry regardless of age.
    pub fn get_any_age<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.path(key).exists() {
            return None;
        }
        self.read(key)
    }

    /// Writes `value` under `key`. Failures are logged and reported as `false`.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match self.write(key, value) {
            Ok(()) => {
                info!("Saved cache file {}", key);
                true
            }
            Err(err) => {
                warn!("Error saving cache file {}: {:#}", key, err);
                false
            }
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Error reading cache file {}: {}", path.display(), err);
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(value) => {
                debug!("Read cached data from {}", key);
                Some(value)
            }
            Err(err) => {
                warn!("Error parsing cache file {}: {}", path.display(), err);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;
        let raw = serde_json::to_vec(value).context("Failed to serialize cache payload")?;
        let target = self.path(key);
        // Each write stages its own sibling file; the rename is the only visible change.
        let mut staging = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create staging file in {}", self.dir.display()))?;
        staging
            .write_all(&raw)
            .with_context(|| format!("Failed to write {}", staging.path().display()))?;
        staging
            .persist(&target)
            .map_err(|err| err.error)
            .with_context(|| format!("Failed to replace {}", target.display()))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::{json, Value};

    pub(crate) fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("spot_wizard_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    pub(crate) fn backdate(path: &Path, by: Duration) {
        let file = fs::File::options()
            .write(true)
            .open(path)
            .expect("open for backdate");
        file.set_modified(SystemTime::now() - by)
            .expect("set mtime");
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = CacheStore::new(scratch_dir("cache_round_trip"), Duration::from_secs(3600));
        let payload = json!({"a": [1, 2, 3], "b": {"nested": "yes"}});
        assert!(store.put("entry.json", &payload));
        let loaded: Value = store.get("entry.json").expect("cached");
        assert_eq!(loaded, payload);
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let store = CacheStore::new(scratch_dir("cache_missing"), Duration::from_secs(3600));
        assert!(store.get::<Value>("nothing.json").is_none());
        assert!(store.get_any_age::<Value>("nothing.json").is_none());
        assert!(store.age("nothing.json").is_none());
    }

    #[test]
    fn expired_entry_is_a_miss_but_still_readable_any_age() {
        let store = CacheStore::new(scratch_dir("cache_expired"), Duration::from_secs(24 * 3600));
        assert!(store.put("old.json", &json!({"ok": true})));
        backdate(&store.path("old.json"), Duration::from_secs(25 * 3600));
        assert!(store.get::<Value>("old.json").is_none());
        assert_eq!(
            store.get_any_age::<Value>("old.json"),
            Some(json!({"ok": true}))
        );
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let store = CacheStore::new(scratch_dir("cache_corrupt"), Duration::from_secs(3600));
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.path("bad.json"), b"{not json").unwrap();
        assert!(store.get::<Value>("bad.json").is_none());
    }

    #[test]
    fn put_overwrites_and_leaves_no_staging_file() {
        let store = CacheStore::new(scratch_dir("cache_overwrite"), Duration::from_secs(3600));
        assert!(store.put("doc.json", &json!({"v": 1})));
        assert!(store.put("doc.json", &json!({"v": 2})));
        assert_eq!(store.get::<Value>("doc.json"), Some(json!({"v": 2})));
        let names: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
    }

    #[test]
    fn put_into_unwritable_location_reports_failure() {
        let base = scratch_dir("cache_unwritable");
        fs::create_dir_all(&base).unwrap();
        let blocker = base.join("file");
        fs::write(&blocker, b"x").unwrap();
        let store = CacheStore::new(blocker.join("sub"), Duration::from_secs(3600));
        assert!(!store.put("doc.json", &json!({})));
    }

    #[test]
    fn concurrent_puts_of_one_key_all_succeed() {
        let store = CacheStore::new(scratch_dir("cache_concurrent"), Duration::from_secs(3600));
        let rows: Vec<Value> = (0..20_000)
            .map(|idx| json!({ "instance": format!("type-{}", idx), "price": "0.0104" }))
            .collect();
        for _ in 0..5 {
            let handles: Vec<_> = (0..4)
                .map(|writer| {
                    let store = store.clone();
                    let payload = json!({ "writer": writer, "rows": rows.clone() });
                    std::thread::spawn(move || store.put("doc.json", &payload))
                })
                .collect();
            for handle in handles {
                assert!(handle.join().unwrap());
            }
            let loaded: Value = store.get("doc.json").expect("complete document");
            assert_eq!(loaded["rows"].as_array().unwrap().len(), rows.len());
        }
        let names: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
    }
}
