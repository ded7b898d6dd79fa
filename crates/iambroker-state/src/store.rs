//! StateStore — redb-backed key-value persistence for the broker.
//!
//! Provides the generic `get`/`set`/`get_range`/`unset_range` contract the
//! reconciler builds on. All values are JSON-serialized into redb's `&[u8]`
//! value column. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::KV;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(KV).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the value stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(key, guard.value())?)),
            None => Ok(None),
        }
    }

    /// Get the value stored under `key`, or `default` if there is none.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> StateResult<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Insert or replace the value under `key`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "state stored");
        Ok(())
    }

    /// Delete `key`. Returns true if it existed.
    pub fn unset(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "state unset");
        Ok(existed)
    }

    /// All values whose key starts with `prefix`, keyed by the remainder of the key.
    pub fn get_range<T: DeserializeOwned>(&self, prefix: &str) -> StateResult<BTreeMap<String, T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        let mut results = BTreeMap::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            // Keys sort lexicographically, so the prefixed run ends at the first miss.
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            results.insert(rest.to_string(), decode(key, value.value())?);
        }
        Ok(results)
    }

    /// Delete `prefix + k` for every `k` in `keys`, in one transaction.
    ///
    /// Returns the number of keys that existed.
    pub fn unset_range<K: AsRef<str>>(&self, keys: &[K], prefix: &str) -> StateResult<u32> {
        if keys.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            for key in keys {
                let full = format!("{prefix}{}", key.as_ref());
                if table.remove(full.as_str()).map_err(map_err!(Write))?.is_some() {
                    count += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%prefix, count, "state range unset");
        Ok(count)
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Deserialize {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
