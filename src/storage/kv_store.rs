// src/storage/kv_store.rs
//! Durable key-value storage for ledgers, balances and the issuer directory.
//!
//! Values are plain JSON text with no schema versioning. Two backends:
//! - [`MemoryKvStore`] for tests and ephemeral runs
//! - [`FileKvStore`], one `<key>.json` file per key under a data directory
//!
//! [`JsonStore`] wraps either backend with typed `store_json` /
//! `retrieve_json` helpers.

use crate::error::{ServiceError, ServiceResult};
use crate::utils::serialization::{deserialize_or_default, serialize};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Minimal string key-value interface.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> ServiceResult<Option<String>>;

    async fn put(&self, key: &str, value: String) -> ServiceResult<()>;
}

/// Process-local store backed by a hashmap.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> ServiceResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> ServiceResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store that keeps each key in its own JSON file.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash never leaves a half-written value behind.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    /// Opens (and creates if needed) the data directory.
    pub async fn open(dir: impl AsRef<Path>) -> ServiceResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
                _ => '_',
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> ServiceResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: String) -> ServiceResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Typed JSON access on top of a [`KvStore`].
#[derive(Clone)]
pub struct JsonStore {
    kv: Arc<dyn KvStore>,
}

impl JsonStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Convenience constructor for an in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    pub async fn get_raw(&self, key: &str) -> ServiceResult<Option<String>> {
        self.kv.get(key).await
    }

    pub async fn put_raw(&self, key: &str, value: String) -> ServiceResult<()> {
        self.kv.put(key, value).await
    }

    /// Serializes `obj` and stores it under `key`.
    pub async fn store_json<T: Serialize + Sync>(&self, key: &str, obj: &T) -> ServiceResult<()> {
        let json = serialize(obj).map_err(|e| ServiceError::Storage(e.to_string()))?;
        self.kv.put(key, json).await
    }

    /// Loads the value under `key`. Missing or unreadable values yield
    /// `T::default()`.
    pub async fn retrieve_json<T: DeserializeOwned + Default>(&self, key: &str) -> ServiceResult<T> {
        let raw = self.kv.get(key).await?;
        Ok(deserialize_or_default(raw.as_deref()))
    }
}

/// Store doubles for failure-path tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Memory store that refuses writes to one key, either every write or
    /// only the n-th (1-based, counted from creation).
    #[derive(Default)]
    pub struct FlakyKv {
        inner: MemoryKvStore,
        rule: Mutex<Option<(String, Option<usize>)>>,
        writes: Mutex<HashMap<String, usize>>,
    }

    impl FlakyKv {
        pub async fn refuse_writes(&self, key: &str) {
            *self.rule.lock().await = Some((key.to_string(), None));
        }

        pub async fn refuse_write_number(&self, key: &str, n: usize) {
            *self.rule.lock().await = Some((key.to_string(), Some(n)));
        }

        pub async fn accept_writes(&self) {
            *self.rule.lock().await = None;
        }
    }

    #[async_trait]
    impl KvStore for FlakyKv {
        async fn get(&self, key: &str) -> ServiceResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: String) -> ServiceResult<()> {
            let attempt = {
                let mut writes = self.writes.lock().await;
                let count = writes.entry(key.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            let refused = match self.rule.lock().await.as_ref() {
                Some((refused_key, nth)) if refused_key == key => nth.map_or(true, |n| n == attempt),
                _ => false,
            };
            if refused {
                return Err(ServiceError::Storage(format!("write {} to {} refused", attempt, key)));
            }
            self.inner.put(key, value).await
        }
    }
}
