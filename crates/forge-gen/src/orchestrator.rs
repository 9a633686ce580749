use crate::error::{BatchError, JobFailure, ProviderError};
use crate::provider::{GenerationProvider, JobHandle, JobRequest, JobState, PermanenceProvider};
use crate::retry::{AbortSignal, RetryPolicy, retry_async};
use forge_history::{HistoryStore, LogoRecord};
use forge_quota::QuotaGateway;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Interval between status polls of one job.
    pub poll_interval: Duration,
    /// Bound on polls per job; exceeding it is a `ProviderTimeout`.
    pub max_polls: u32,
    /// Retry policy for job creation under busy/server failures.
    pub create_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 60,
            create_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedImage {
    pub job_id: String,
    pub url: String,
}

/// Result of one metered batch. All jobs are awaited; the fulfilled ones
/// are kept, the rest are reported alongside.
#[derive(Debug)]
pub struct BatchResult {
    pub images: Vec<GeneratedImage>,
    pub failures: Vec<JobFailure>,
    pub requested: usize,
    /// Credits left after this batch's single consume.
    pub remaining: u32,
}

impl BatchResult {
    pub fn is_partial(&self) -> bool {
        !self.images.is_empty() && self.images.len() < self.requested
    }
}

/// Fans one user-initiated generate action out to N independent provider
/// jobs under exactly one quota unit.
pub struct Orchestrator {
    gateway: Arc<QuotaGateway>,
    provider: Arc<dyn GenerationProvider>,
    permanence: Arc<dyn PermanenceProvider>,
    history: Arc<HistoryStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<QuotaGateway>,
        provider: Arc<dyn GenerationProvider>,
        permanence: Arc<dyn PermanenceProvider>,
        history: Arc<HistoryStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gateway,
            provider,
            permanence,
            history,
            config,
        }
    }

    pub async fn run_batch(
        &self,
        user_id: &str,
        request: &JobRequest,
        count: usize,
    ) -> Result<BatchResult, BatchError> {
        self.run_batch_with_abort(user_id, request, count, AbortSignal::default())
            .await
    }

    /// Run one batch. The quota consume happens before any provider call;
    /// a refused consume issues none. A batch that consumed its credit but
    /// produced nothing is not refunded: the unit of metering is the
    /// attempt, not the image.
    pub async fn run_batch_with_abort(
        &self,
        user_id: &str,
        request: &JobRequest,
        count: usize,
        abort: AbortSignal,
    ) -> Result<BatchResult, BatchError> {
        let decision = self.gateway.check_and_consume(user_id).await?;
        if !decision.granted {
            tracing::info!(user_id, "generation refused, quota exhausted");
            return Err(BatchError::QuotaExhausted);
        }
        tracing::info!(user_id, count, remaining = decision.remaining, "starting generation batch");

        let outcomes = join_all(
            (0..count).map(|slot| self.run_job(slot, request, abort.clone())),
        )
        .await;

        let mut images = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(image) => images.push(image),
                Err(failure) => {
                    tracing::warn!(user_id, %failure, "generation job failed");
                    failures.push(failure);
                }
            }
        }

        if images.is_empty() {
            return Err(BatchError::NoImagesProduced { failures });
        }

        // Losing the history write does not undo a produced batch.
        let first = &images[0];
        if let Err(error) = self
            .history
            .append(user_id, LogoRecord::new(&request.prompt, &first.url))
            .await
        {
            tracing::warn!(user_id, %error, "could not record batch in history");
        }

        Ok(BatchResult {
            images,
            failures,
            requested: count,
            remaining: decision.remaining,
        })
    }

    async fn run_job(
        &self,
        slot: usize,
        request: &JobRequest,
        abort: AbortSignal,
    ) -> Result<GeneratedImage, JobFailure> {
        let handle = retry_async(&self.config.create_retry, || {
            self.provider.create_job(request)
        })
        .await
        .map_err(JobFailure::Unavailable)?;
        tracing::debug!(slot, job_id = %handle.0, "job created");

        self.poll_job(&handle, abort).await
    }

    async fn poll_job(
        &self,
        handle: &JobHandle,
        abort: AbortSignal,
    ) -> Result<GeneratedImage, JobFailure> {
        for _ in 0..self.config.max_polls {
            if abort.is_aborted() {
                return Err(JobFailure::Aborted {
                    job_id: handle.0.clone(),
                });
            }
            match self.provider.get_job(handle).await {
                Ok(JobState::Pending) => {}
                Ok(JobState::Succeeded { output_url }) => {
                    return self.make_durable(handle, &output_url).await;
                }
                Ok(JobState::Failed { reason }) => {
                    return Err(JobFailure::Failed {
                        job_id: handle.0.clone(),
                        reason,
                    });
                }
                // A flaky poll burns one attempt from the budget rather
                // than failing the job.
                Err(error) if error.retryable => {
                    tracing::debug!(job_id = %handle.0, %error, "transient poll failure");
                }
                Err(error) => return Err(JobFailure::Unavailable(error)),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Err(JobFailure::Timeout {
            job_id: handle.0.clone(),
        })
    }

    async fn make_durable(
        &self,
        handle: &JobHandle,
        output_url: &str,
    ) -> Result<GeneratedImage, JobFailure> {
        let durable = self
            .permanence
            .store(output_url)
            .await
            .map_err(|error: ProviderError| JobFailure::Permanence {
                job_id: handle.0.clone(),
                message: error.to_string(),
            })?;
        Ok(GeneratedImage {
            job_id: handle.0.clone(),
            url: durable,
        })
    }
}
