//! Flat per-entity JSON cache.
//!
//! One file per key under a single directory. The store knows nothing about
//! freshness; callers stamp entries via [`Cached`] and decide their own TTL.
//! Writes replace the whole entry through a tmp-file rename, so a reader
//! never observes a partial document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache encode error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A payload with the instant it was fetched, in unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cached<T> {
    pub fetched_at: i64,
    pub data: T,
}

impl<T> Cached<T> {
    pub fn now(data: T) -> Self {
        Self {
            fetched_at: glance_common::unix_now(),
            data,
        }
    }

    /// Whether the entry is still inside the caller's freshness window.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        let age = glance_common::unix_now().saturating_sub(self.fetched_at);
        age >= 0 && (age as u64) < ttl.as_secs()
    }
}

/// Keyed file-backed storage of JSON documents.
///
/// There is at most one entry per key; a write fully overwrites the prior
/// entry. Reads of absent keys are `Ok(None)`, never an error. Corrupt
/// entries also read as absent so the caller re-fetches and overwrites.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(key, error = %err, "cache.read.corrupt_entry");
                Ok(None)
            }
        }
    }

    pub async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(value)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(key, bytes = bytes.len(), "cache.write");
        Ok(())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

/// Keys come from usernames and platform ids; anything outside a safe
/// filename alphabet maps to `_` so a key can never traverse paths.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn absent_key_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let got: Option<serde_json::Value> = store.read("user_nobody").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let entry = Cached::now(json!({"id": "42"}));
        store.write("user_alice", &entry).await.unwrap();

        let got: Cached<serde_json::Value> = store.read("user_alice").await.unwrap().unwrap();
        assert_eq!(got.data["id"], "42");
        assert_eq!(got.fetched_at, entry.fetched_at);
    }

    #[tokio::test]
    async fn write_overwrites_the_prior_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store.write("k", &json!({"v": 1})).await.unwrap();
        store.write("k", &json!({"v": 2})).await.unwrap();

        let got: serde_json::Value = store.read("k").await.unwrap().unwrap();
        assert_eq!(got["v"], 2);
    }

    #[tokio::test]
    async fn corrupt_entry_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();

        let got: Option<serde_json::Value> = store.read("bad").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store.write("../evil", &json!(1)).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec![".._evil.json"]);
    }

    #[test]
    fn freshness_is_a_window_over_fetched_at() {
        let entry = Cached {
            fetched_at: glance_common::unix_now() - 10,
            data: (),
        };
        assert!(entry.is_fresh(Duration::from_secs(3600)));
        assert!(!entry.is_fresh(Duration::from_secs(5)));
    }
}
