//! In-memory key-value store with per-entry TTL and optional JSON snapshots.
//!
//! Snapshots let one-shot CLI commands (`build`, `resolve`, `calibrate`)
//! share signals, outcomes, and the learned confidence config.

use algo_signal_core::{Clock, KeyValueStore, SystemClock};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: Value,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Thread-safe in-memory store.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    snapshot_path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            snapshot_path: None,
        }
    }

    /// Uses a custom clock for expiry (useful for testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Opens a store backed by a snapshot file, loading it if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self::new();

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let raw = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read store snapshot {}", path.display()))?;
            let entries: HashMap<String, Entry> = serde_json::from_slice(&raw)
                .with_context(|| format!("Failed to parse store snapshot {}", path.display()))?;
            tracing::debug!(path = %path.display(), entries = entries.len(), "Loaded store snapshot");
            store.entries = RwLock::new(entries);
        }

        store.snapshot_path = Some(path);
        Ok(store)
    }

    #[must_use]
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Writes live entries to the snapshot file. No-op without a snapshot path.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized or written.
    pub async fn save_snapshot(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let raw = {
            let now = self.clock.now();
            let entries = self.entries.read();
            let live: HashMap<&String, &Entry> = entries.iter().filter(|(_, e)| e.is_live(now)).collect();
            serde_json::to_vec_pretty(&live).context("Failed to serialize store snapshot")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, raw)
            .await
            .with_context(|| format!("Failed to write store snapshot {}", path.display()))?;
        Ok(())
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl));
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algo_signal_core::ManualClock;
    use chrono::TimeZone;
    use serde_json::json;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", json!({"x": 1}), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_entries_expire_with_clock() {
        let clock = clock();
        let store = MemoryStore::new().with_clock(clock.clone());

        store
            .set("signals:latest", json!([]), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        store.set("forever", json!(1), None).await.unwrap();

        clock.advance(chrono::Duration::seconds(59));
        assert!(store.get("signals:latest").await.unwrap().is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(store.get("signals:latest").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");

        let store = MemoryStore::open(&path).await.unwrap();
        store.set("outcomes:index", json!(["outcome:BTC:1"]), None).await.unwrap();
        store.save_snapshot().await.unwrap();

        let reopened = MemoryStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("outcomes:index").await.unwrap(),
            Some(json!(["outcome:BTC:1"]))
        );
        assert_eq!(reopened.snapshot_path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_open_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        assert!(MemoryStore::open(&path).await.is_err());
    }
}
