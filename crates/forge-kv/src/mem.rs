use crate::{KvStore, SetOptions, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Instant,
};

#[derive(Clone, Debug)]
struct Entry {
    text: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

/// In-memory backend. Used by tests and single-process runs; expiry is
/// checked lazily on access.
///
/// Entries hold the serialized text, matching what a REST backend stores,
/// so swaps compare the same bytes here as they would remotely.
#[derive(Clone, Default)]
pub struct MemKv {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl std::fmt::Debug for MemKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemKv")
            .field("entries", &self.entries.read().unwrap().len())
            .finish()
    }
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store arbitrary text under a key, bypassing JSON serialization.
    /// Lets tests seed the exact byte shapes older writers left behind.
    pub fn set_text(&self, key: &str, text: impl Into<String>) {
        let mut guard = self.entries.write().unwrap();
        guard.insert(
            key.to_string(),
            Entry {
                text: text.into(),
                expires_at: None,
            },
        );
    }
}

#[async_trait]
impl KvStore for MemKv {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.get_text(key).await?.map(|text| {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }))
    }

    async fn get_text(&self, key: &str) -> StoreResult<Option<String>> {
        let guard = self.entries.read().unwrap();
        Ok(guard
            .get(key)
            .filter(|entry| entry.live())
            .map(|entry| entry.text.clone()))
    }

    async fn set(&self, key: &str, value: Value, opts: SetOptions) -> StoreResult<()> {
        let mut guard = self.entries.write().unwrap();
        guard.insert(
            key.to_string(),
            Entry {
                text: value.to_string(),
                expires_at: opts.ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut guard = self.entries.write().unwrap();
        guard.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&Value>,
    ) -> StoreResult<bool> {
        let mut guard = self.entries.write().unwrap();
        let current = guard
            .get(key)
            .filter(|entry| entry.live())
            .map(|entry| entry.text.as_str());
        if current != expected {
            return Ok(false);
        }
        match new {
            Some(value) => {
                guard.insert(
                    key.to_string(),
                    Entry {
                        text: value.to_string(),
                        expires_at: None,
                    },
                );
            }
            None => {
                guard.remove(key);
            }
        }
        Ok(true)
    }
}
