use crate::error::{QuotaError, QuotaResult};
use crate::identity::Caller;
use crate::ledger::QuotaLedger;
use crate::record::{DEFAULT_ALLOWANCE, QuotaRecord, now_ms};

#[derive(Clone, Copy, Debug)]
pub struct GatewayConfig {
    pub allowance: u32,
    /// Bound on compare-and-swap retries under contention.
    pub consume_attempts: u32,
    /// Whether `peek` rewrites non-canonical records it managed to decode.
    pub repair_on_peek: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allowance: DEFAULT_ALLOWANCE,
            consume_attempts: 4,
            repair_on_peek: true,
        }
    }
}

/// Outcome of a consume attempt. An exhausted quota is a normal business
/// result, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub granted: bool,
    pub remaining: u32,
}

/// The operation surface every other component goes through. Wraps the
/// ledger with fallback, repair, and the atomic consume contract.
#[derive(Clone)]
pub struct QuotaGateway {
    ledger: QuotaLedger,
    config: GatewayConfig,
}

impl QuotaGateway {
    pub fn new(ledger: QuotaLedger, config: GatewayConfig) -> Self {
        Self { ledger, config }
    }

    pub fn allowance(&self) -> u32 {
        self.config.allowance
    }

    /// Read the remaining credits without changing the semantic balance.
    ///
    /// An absent primary record falls back to the retired secondary key
    /// once and migrates it forward; an unparsable record degrades to the
    /// default allowance. Either path rewrites the primary in canonical
    /// form so later reads skip the fallback.
    pub async fn peek(&self, user_id: &str) -> QuotaResult<u32> {
        match self.ledger.read_raw(user_id).await? {
            Some(raw) => match QuotaLedger::decode(&raw) {
                Ok(record) => {
                    if self.config.repair_on_peek && record.encode().to_string() != raw {
                        tracing::debug!(user_id, "rewriting legacy quota encoding");
                        self.ledger.write(user_id, &record).await?;
                    }
                    Ok(record.remaining(self.config.allowance))
                }
                Err(error) => {
                    tracing::warn!(user_id, %error, "unparsable quota record, assuming full allowance");
                    if self.config.repair_on_peek {
                        self.ledger.write(user_id, &QuotaRecord::fresh(now_ms())).await?;
                    }
                    Ok(self.config.allowance)
                }
            },
            None => match self.migrate_legacy(user_id).await? {
                Some(record) => Ok(record.remaining(self.config.allowance)),
                None => Ok(self.config.allowance),
            },
        }
    }

    /// Atomically gate one batch: decide whether a credit remains and, if
    /// so, consume exactly one. A storage fault refuses rather than grants.
    ///
    /// The swap is conditioned on the exact stored text, so legacy and even
    /// undecodable records are replaced in the same atomic step; a lost swap
    /// always means a concurrent writer got there first.
    pub async fn check_and_consume(&self, user_id: &str) -> QuotaResult<Decision> {
        for attempt in 0..self.config.consume_attempts {
            let raw = self.ledger.read_raw(user_id).await?;
            let record = match &raw {
                Some(text) => QuotaLedger::decode(text).unwrap_or_else(|error| {
                    tracing::warn!(user_id, %error, "unparsable quota record, assuming full allowance");
                    QuotaRecord::fresh(now_ms())
                }),
                None => match self.migrate_legacy(user_id).await? {
                    Some(record) => record,
                    None => QuotaRecord::fresh(now_ms()),
                },
            };

            let remaining = record.remaining(self.config.allowance);
            let Some(consumed) = record.consume(self.config.allowance) else {
                return Ok(Decision {
                    granted: false,
                    remaining: 0,
                });
            };

            // The migrate path above may have written the primary; read the
            // text the swap must be conditioned on.
            let expected = match raw {
                Some(text) => Some(text),
                None => self.ledger.read_raw(user_id).await?,
            };
            if self.ledger.swap(user_id, expected.as_deref(), &consumed).await? {
                return Ok(Decision {
                    granted: true,
                    remaining: remaining - 1,
                });
            }
            tracing::debug!(user_id, attempt, "quota consume lost a swap, retrying");
        }

        Err(QuotaError::Contention {
            user_id: user_id.to_string(),
            attempts: self.config.consume_attempts,
        })
    }

    /// Set remaining credits to exactly `n`, overriding any prior state.
    pub async fn grant(&self, caller: &Caller, user_id: &str, n: u32) -> QuotaResult<u32> {
        self.authorize(caller, user_id)?;
        let record = QuotaRecord::with_remaining(n, self.config.allowance, now_ms());
        self.ledger.write(user_id, &record).await?;
        tracing::info!(user_id, granted = n, by = %caller.user_id, "quota granted");
        Ok(n)
    }

    /// Drop the record entirely; the next read re-derives the default
    /// allowance.
    pub async fn reset(&self, caller: &Caller, user_id: &str) -> QuotaResult<()> {
        self.authorize(caller, user_id)?;
        self.ledger.delete(user_id).await?;
        tracing::info!(user_id, by = %caller.user_id, "quota reset");
        Ok(())
    }

    fn authorize(&self, caller: &Caller, user_id: &str) -> QuotaResult<()> {
        if caller.can_manage(user_id) {
            return Ok(());
        }
        Err(QuotaError::Unauthorized {
            caller_id: caller.user_id.clone(),
            user_id: user_id.to_string(),
        })
    }

    /// One-shot migration of the retired secondary key into the primary.
    async fn migrate_legacy(&self, user_id: &str) -> QuotaResult<Option<QuotaRecord>> {
        let Some(raw) = self.ledger.read_legacy_raw(user_id).await? else {
            return Ok(None);
        };
        match QuotaLedger::decode(&raw) {
            Ok(record) => {
                tracing::debug!(user_id, "migrating secondary quota key into primary");
                self.ledger.write(user_id, &record).await?;
                Ok(Some(record))
            }
            Err(error) => {
                tracing::warn!(user_id, %error, "unparsable secondary quota record, ignoring");
                Ok(None)
            }
        }
    }
}
