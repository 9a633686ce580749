//! Per-user generation credit accounting.
//!
//! The ledger owns the durable quota record and its decoding across every
//! physical encoding the deployed system has ever written; the gateway is
//! the only surface other components call (`peek`, `check_and_consume`,
//! `grant`, `reset`).

mod error;
mod gateway;
mod identity;
mod ledger;
mod record;

pub use error::{QuotaError, QuotaResult};
pub use gateway::{Decision, GatewayConfig, QuotaGateway};
pub use identity::{ANONYMOUS_USER_ID, Caller, IdentityResolver, Role};
pub use ledger::{LedgerConfig, QuotaLedger};
pub use record::{Balance, DEFAULT_ALLOWANCE, DecodeError, QuotaRecord};
