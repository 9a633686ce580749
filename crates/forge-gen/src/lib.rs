//! Logo generation: provider adapters, bounded retry, and the batch
//! orchestrator that fans one user action out to N provider jobs under a
//! single quota unit.

mod error;
mod orchestrator;
mod permanence;
mod provider;
mod replicate;
mod retry;

pub use error::{BatchError, JobFailure, ProviderError, ProviderErrorKind, map_http_status};
pub use orchestrator::{BatchResult, GeneratedImage, Orchestrator, OrchestratorConfig};
pub use permanence::{HttpPermanence, PermanenceConfig};
pub use provider::{
    GenerationProvider, JobHandle, JobRequest, JobState, PermanenceProvider,
};
pub use replicate::{ReplicateConfig, ReplicateProvider};
pub use retry::{AbortController, AbortSignal, RetryPolicy, compute_backoff_delay, retry_async};
