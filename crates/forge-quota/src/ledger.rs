use crate::error::QuotaResult;
use crate::record::{DecodeError, QuotaRecord};
use forge_kv::{DynKv, SetOptions};

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Primary key namespace; keys are `{namespace}:{user_id}:{suffix}`.
    pub namespace: String,
    pub suffix: String,
    /// Namespace of the retired secondary key (`{legacy_namespace}:{user_id}`)
    /// a separate subsystem once wrote `{"remaining": n}` objects under.
    /// Read once for migration, never written.
    pub legacy_namespace: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            namespace: "quota".into(),
            suffix: "usage".into(),
            legacy_namespace: "credits".into(),
        }
    }
}

/// Durable storage for quota records. The ledger moves stored text and
/// canonical records; interpretation policy (fallbacks, repair) lives in the
/// gateway. Reads return the physical text so the consume path can condition
/// its swap on the exact bytes it decoded, whatever shape they are in.
#[derive(Clone)]
pub struct QuotaLedger {
    kv: DynKv,
    config: LedgerConfig,
}

impl QuotaLedger {
    pub fn new(kv: DynKv, config: LedgerConfig) -> Self {
        Self { kv, config }
    }

    pub fn primary_key(&self, user_id: &str) -> String {
        format!("{}:{user_id}:{}", self.config.namespace, self.config.suffix)
    }

    pub fn legacy_key(&self, user_id: &str) -> String {
        format!("{}:{user_id}", self.config.legacy_namespace)
    }

    pub async fn read_raw(&self, user_id: &str) -> QuotaResult<Option<String>> {
        Ok(self.kv.get_text(&self.primary_key(user_id)).await?)
    }

    pub async fn read_legacy_raw(&self, user_id: &str) -> QuotaResult<Option<String>> {
        Ok(self.kv.get_text(&self.legacy_key(user_id)).await?)
    }

    pub fn decode(raw: &str) -> Result<QuotaRecord, DecodeError> {
        QuotaRecord::decode_stored(raw)
    }

    pub async fn write(&self, user_id: &str, record: &QuotaRecord) -> QuotaResult<()> {
        self.kv
            .set(&self.primary_key(user_id), record.encode(), SetOptions::default())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, user_id: &str) -> QuotaResult<()> {
        self.kv.delete(&self.primary_key(user_id)).await?;
        Ok(())
    }

    /// Conditional write for the consume path: applies `record` only if the
    /// stored text still equals `expected`.
    pub async fn swap(
        &self,
        user_id: &str,
        expected: Option<&str>,
        record: &QuotaRecord,
    ) -> QuotaResult<bool> {
        let encoded = record.encode();
        Ok(self
            .kv
            .compare_and_swap(&self.primary_key(user_id), expected, Some(&encoded))
            .await?)
    }
}
