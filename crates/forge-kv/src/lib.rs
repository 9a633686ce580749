//! Key-value store abstraction plus in-memory and REST-backed implementations.

mod mem;
mod rest;

pub use mem::MemKv;
pub use rest::{RestKv, RestKvConfig};

use async_trait::async_trait;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

pub type StoreResult<T> = Result<T, StoreError>;
pub type DynKv = Arc<dyn KvStore>;

/// Options applied to a `set` operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetOptions {
    /// Expire the key after this duration.
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Trait implemented by all key-value backends.
///
/// Values are stored as JSON text: callers own interpretation, the store
/// only moves bytes. `get` offers a parsed view for convenience, but the
/// physical text is the unit of identity: `compare_and_swap` conditions on
/// the exact stored bytes (`get_text`), never on a parsed value, so a swap
/// can target any stored payload, including ones that are not valid JSON.
/// The swap must be atomic with respect to every other operation on the
/// same key.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Parsed view of the stored text. Text that is not valid JSON is
    /// surfaced as a plain string value so callers can run their own legacy
    /// decoding against it.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// The exact stored text, byte for byte.
    async fn get_text(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: Value, opts: SetOptions) -> StoreResult<()>;
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Replace the key's value with `new` only if the stored text equals
    /// `expected` (`None` meaning absent). Returns whether the swap was
    /// applied. `new = None` deletes the key.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&Value>,
    ) -> StoreResult<bool>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            message: message.into(),
        }
    }
}
