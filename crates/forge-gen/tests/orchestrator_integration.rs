use async_trait::async_trait;
use forge_gen::{
    AbortController, BatchError, GenerationProvider, JobFailure, JobHandle, JobRequest, JobState,
    Orchestrator, OrchestratorConfig, PermanenceProvider, ProviderError, ProviderErrorKind,
    RetryPolicy,
};
use forge_history::HistoryStore;
use forge_kv::MemKv;
use forge_quota::{Caller, GatewayConfig, LedgerConfig, QuotaGateway, QuotaLedger};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Provider whose job outcomes are scripted per slot.
#[derive(Default)]
struct ScriptedProvider {
    create_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    /// Slots whose jobs fail terminally.
    failing_slots: HashSet<usize>,
    /// Number of leading `create_job` calls refused with a busy signal.
    busy_creates: AtomicUsize,
    /// Polls each job spends pending before reaching a terminal state.
    pending_polls: usize,
    /// When set, jobs never leave pending.
    never_finishes: bool,
}

impl ScriptedProvider {
    fn failing(slots: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing_slots: slots.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn create_job(&self, _request: &JobRequest) -> Result<JobHandle, ProviderError> {
        if self
            .busy_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            return Err(ProviderError::new(ProviderErrorKind::Busy, "queue full"));
        }
        let slot = self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(JobHandle(format!("job-{slot}")))
    }

    async fn get_job(&self, handle: &JobHandle) -> Result<JobState, ProviderError> {
        let polls = self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if self.never_finishes || polls < self.pending_polls {
            return Ok(JobState::Pending);
        }
        let slot: usize = handle
            .0
            .strip_prefix("job-")
            .and_then(|raw| raw.parse().ok())
            .expect("scripted handle");
        if self.failing_slots.contains(&slot) {
            Ok(JobState::Failed {
                reason: "NSFW content detected".to_string(),
            })
        } else {
            Ok(JobState::Succeeded {
                output_url: format!("https://tmp.example/{slot}.png"),
            })
        }
    }
}

/// Permanence that prefixes the temporary URL.
#[derive(Default)]
struct EchoPermanence {
    calls: AtomicUsize,
}

#[async_trait]
impl PermanenceProvider for EchoPermanence {
    async fn store(&self, temporary_url: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://durable.example/{}", temporary_url.rsplit('/').next().unwrap()))
    }
}

struct Fixture {
    orchestrator: Orchestrator,
    gateway: Arc<QuotaGateway>,
    history: Arc<HistoryStore>,
    provider: Arc<ScriptedProvider>,
}

fn fixture(provider: ScriptedProvider) -> Fixture {
    let kv = Arc::new(MemKv::new());
    let gateway = Arc::new(QuotaGateway::new(
        QuotaLedger::new(kv.clone(), LedgerConfig::default()),
        GatewayConfig::default(),
    ));
    let history = Arc::new(HistoryStore::new(kv));
    let provider = Arc::new(provider);
    let config = OrchestratorConfig {
        poll_interval: Duration::from_millis(1),
        max_polls: 10,
        create_retry: RetryPolicy {
            base_delay: 0.0,
            jitter: false,
            ..RetryPolicy::default()
        },
    };
    let orchestrator = Orchestrator::new(
        gateway.clone(),
        provider.clone(),
        Arc::new(EchoPermanence::default()),
        history.clone(),
        config,
    );
    Fixture {
        orchestrator,
        gateway,
        history,
        provider,
    }
}

fn request() -> JobRequest {
    JobRequest::new("minimal geometric fox logo")
}

#[tokio::test]
async fn exhausted_quota_issues_zero_provider_calls() {
    let fx = fixture(ScriptedProvider::default());
    let admin = Caller::admin("ops");
    fx.gateway.grant(&admin, "u1", 0).await.expect("grant");

    let result = fx.orchestrator.run_batch("u1", &request(), 4).await;
    assert!(matches!(result, Err(BatchError::QuotaExhausted)));
    assert_eq!(fx.provider.create_calls.load(Ordering::SeqCst), 0);

    // Retrying while exhausted consumes nothing further.
    let result = fx.orchestrator.run_batch("u1", &request(), 4).await;
    assert!(matches!(result, Err(BatchError::QuotaExhausted)));
    assert_eq!(fx.gateway.peek("u1").await.expect("peek"), 0);
}

#[tokio::test]
async fn partial_failure_keeps_the_fulfilled_jobs() {
    // 2 of 5 jobs fail; one credit consumed.
    let fx = fixture(ScriptedProvider::failing([1, 3]));
    let before = fx.gateway.peek("u1").await.expect("peek");

    let result = fx
        .orchestrator
        .run_batch("u1", &request(), 5)
        .await
        .expect("batch");
    assert_eq!(result.images.len(), 3);
    assert_eq!(result.failures.len(), 2);
    assert!(result.is_partial());
    assert!(
        result
            .failures
            .iter()
            .all(|failure| matches!(failure, JobFailure::Failed { .. }))
    );
    assert_eq!(fx.gateway.peek("u1").await.expect("peek"), before - 1);
}

#[tokio::test]
async fn full_success_is_not_partial_and_lands_in_history() {
    let fx = fixture(ScriptedProvider::default());
    let result = fx
        .orchestrator
        .run_batch("u1", &request(), 3)
        .await
        .expect("batch");
    assert_eq!(result.images.len(), 3);
    assert!(!result.is_partial());
    assert!(result.images.iter().all(|image| {
        image.url.starts_with("https://durable.example/")
    }));

    let page = fx.history.list("u1").await.expect("list");
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].image_url, result.images[0].url);
    assert_eq!(page.records[0].prompt, "minimal geometric fox logo");
}

#[tokio::test]
async fn all_failed_batch_reports_and_does_not_refund() {
    let fx = fixture(ScriptedProvider::failing([0, 1, 2]));
    let result = fx.orchestrator.run_batch("u1", &request(), 3).await;
    match result {
        Err(BatchError::NoImagesProduced { failures }) => assert_eq!(failures.len(), 3),
        other => panic!("expected NoImagesProduced, got {other:?}"),
    }
    // The attempt is the unit of metering: the credit stays spent.
    assert_eq!(fx.gateway.peek("u1").await.expect("peek"), 2);
    assert!(fx.history.list("u1").await.expect("list").records.is_empty());
}

#[tokio::test]
async fn busy_creates_are_retried_with_backoff() {
    let provider = ScriptedProvider {
        busy_creates: AtomicUsize::new(2),
        ..ScriptedProvider::default()
    };
    let fx = fixture(provider);
    let result = fx
        .orchestrator
        .run_batch("u1", &request(), 1)
        .await
        .expect("batch");
    assert_eq!(result.images.len(), 1);
}

#[tokio::test]
async fn pending_jobs_are_polled_to_completion() {
    let provider = ScriptedProvider {
        pending_polls: 3,
        ..ScriptedProvider::default()
    };
    let fx = fixture(provider);
    let result = fx
        .orchestrator
        .run_batch("u1", &request(), 1)
        .await
        .expect("batch");
    assert_eq!(result.images.len(), 1);
    assert!(fx.provider.poll_calls.load(Ordering::SeqCst) >= 4);
}

#[tokio::test]
async fn jobs_exceeding_the_polling_budget_time_out() {
    let provider = ScriptedProvider {
        never_finishes: true,
        ..ScriptedProvider::default()
    };
    let fx = fixture(provider);
    let result = fx.orchestrator.run_batch("u1", &request(), 2).await;
    match result {
        Err(BatchError::NoImagesProduced { failures }) => {
            assert_eq!(failures.len(), 2);
            assert!(
                failures
                    .iter()
                    .all(|failure| matches!(failure, JobFailure::Timeout { .. }))
            );
        }
        other => panic!("expected NoImagesProduced, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_stops_polling_without_refunding() {
    let provider = ScriptedProvider {
        never_finishes: true,
        ..ScriptedProvider::default()
    };
    let fx = fixture(provider);
    let controller = AbortController::new();
    controller.abort();

    let result = fx
        .orchestrator
        .run_batch_with_abort("u1", &request(), 2, controller.signal())
        .await;
    match result {
        Err(BatchError::NoImagesProduced { failures }) => {
            assert!(
                failures
                    .iter()
                    .all(|failure| matches!(failure, JobFailure::Aborted { .. }))
            );
        }
        other => panic!("expected NoImagesProduced, got {other:?}"),
    }
    assert_eq!(fx.gateway.peek("u1").await.expect("peek"), 2);
}

#[tokio::test]
async fn batches_consume_one_credit_regardless_of_count() {
    let fx = fixture(ScriptedProvider::default());
    fx.orchestrator
        .run_batch("u1", &request(), 6)
        .await
        .expect("batch");
    assert_eq!(fx.gateway.peek("u1").await.expect("peek"), 2);
}
