//! Per-user history of generated logos.
//!
//! Plain keyed-list CRUD over the shared key-value store. The durable
//! per-user invalidation flag lives here too: writers set it, the next
//! `list` clears it and reports it, so UI caches know to refetch without
//! any process-local signaling.

use forge_kv::{DynKv, SetOptions, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Bound on compare-and-swap retries when writers collide on one list.
const SAVE_ATTEMPTS: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
    #[error("no history record '{id}' for '{user_id}'")]
    NotFound { user_id: String, id: String },
    #[error("history for '{user_id}' kept changing underneath the writer")]
    Contention { user_id: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogoRecord {
    pub id: String,
    pub prompt: String,
    pub image_url: String,
    pub created_at: i64,
    #[serde(default)]
    pub favorite: bool,
}

impl LogoRecord {
    pub fn new(prompt: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            image_url: image_url.into(),
            created_at: now_ms(),
            favorite: false,
        }
    }
}

/// Patch applied by `update`; absent fields are left alone.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogoPatch {
    pub favorite: Option<bool>,
    pub prompt: Option<String>,
    pub image_url: Option<String>,
}

/// Result of `list`: the records plus whether a writer had invalidated the
/// user's cached view since the previous read.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryPage {
    pub records: Vec<LogoRecord>,
    pub invalidated: bool,
}

#[derive(Clone)]
pub struct HistoryStore {
    kv: DynKv,
}

impl HistoryStore {
    pub fn new(kv: DynKv) -> Self {
        Self { kv }
    }

    fn list_key(user_id: &str) -> String {
        format!("history:{user_id}")
    }

    fn dirty_key(user_id: &str) -> String {
        format!("history:{user_id}:dirty")
    }

    pub async fn append(&self, user_id: &str, record: LogoRecord) -> HistoryResult<()> {
        self.mutate(user_id, |records| {
            records.push(record.clone());
            Ok(())
        })
        .await
    }

    pub async fn list(&self, user_id: &str) -> HistoryResult<HistoryPage> {
        let records = self.load(user_id).await?;
        let invalidated = self.take_dirty(user_id).await?;
        Ok(HistoryPage {
            records,
            invalidated,
        })
    }

    pub async fn update(&self, user_id: &str, id: &str, patch: LogoPatch) -> HistoryResult<()> {
        self.mutate(user_id, |records| {
            let record = records
                .iter_mut()
                .find(|record| record.id == id)
                .ok_or_else(|| HistoryError::NotFound {
                    user_id: user_id.to_string(),
                    id: id.to_string(),
                })?;
            let patch = patch.clone();
            if let Some(favorite) = patch.favorite {
                record.favorite = favorite;
            }
            if let Some(prompt) = patch.prompt {
                record.prompt = prompt;
            }
            if let Some(image_url) = patch.image_url {
                record.image_url = image_url;
            }
            Ok(())
        })
        .await
    }

    pub async fn remove(&self, user_id: &str, id: &str) -> HistoryResult<()> {
        self.mutate(user_id, |records| {
            let before = records.len();
            records.retain(|record| record.id != id);
            if records.len() == before {
                return Err(HistoryError::NotFound {
                    user_id: user_id.to_string(),
                    id: id.to_string(),
                });
            }
            Ok(())
        })
        .await
    }

    /// Read-modify-write conditioned on the stored text, so two writers
    /// touching the same list cannot drop each other's records. Each retry
    /// reloads and reapplies `apply` against the fresh list.
    async fn mutate<F>(&self, user_id: &str, mut apply: F) -> HistoryResult<()>
    where
        F: FnMut(&mut Vec<LogoRecord>) -> HistoryResult<()>,
    {
        let key = Self::list_key(user_id);
        for _ in 0..SAVE_ATTEMPTS {
            let (mut records, text) = self.load_with_text(user_id).await?;
            apply(&mut records)?;
            let value = serde_json::to_value(&records).unwrap_or_else(|_| json!([]));
            if self
                .kv
                .compare_and_swap(&key, text.as_deref(), Some(&value))
                .await?
            {
                return self.mark_dirty(user_id).await;
            }
            tracing::debug!(user_id, "history write lost a swap, retrying");
        }
        Err(HistoryError::Contention {
            user_id: user_id.to_string(),
        })
    }

    async fn load(&self, user_id: &str) -> HistoryResult<Vec<LogoRecord>> {
        Ok(self.load_with_text(user_id).await?.0)
    }

    async fn load_with_text(
        &self,
        user_id: &str,
    ) -> HistoryResult<(Vec<LogoRecord>, Option<String>)> {
        let Some(text) = self.kv.get_text(&Self::list_key(user_id)).await? else {
            return Ok((Vec::new(), None));
        };
        // A list that fails to parse is dropped rather than bricking the
        // account; the quota ledger takes the same stance.
        let records = serde_json::from_str(&text).unwrap_or_else(|error| {
            tracing::warn!(user_id, %error, "unparsable history list, starting empty");
            Vec::new()
        });
        Ok((records, Some(text)))
    }

    async fn mark_dirty(&self, user_id: &str) -> HistoryResult<()> {
        self.kv
            .set(&Self::dirty_key(user_id), json!(true), SetOptions::default())
            .await?;
        Ok(())
    }

    /// Read and clear the invalidation flag in one conditional step.
    async fn take_dirty(&self, user_id: &str) -> HistoryResult<bool> {
        let key = Self::dirty_key(user_id);
        let Some(flag) = self.kv.get_text(&key).await? else {
            return Ok(false);
        };
        self.kv.compare_and_swap(&key, Some(flag.as_str()), None).await?;
        Ok(flag == "true")
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
