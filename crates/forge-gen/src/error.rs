use forge_quota::QuotaError;

/// Provider failure classification. `Busy` is the queue-full / rate-limited
/// signal providers emit under load and is always worth retrying; hard
/// failures are not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Busy,
    Server,
    Timeout,
    InvalidRequest,
    Authentication,
    NotFound,
    Other,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub retryable: bool,
    /// Provider-suggested delay in seconds, honored by the retry policy.
    pub retry_after: Option<f64>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retryable: default_retryable_for_kind(kind),
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

pub fn default_retryable_for_kind(kind: ProviderErrorKind) -> bool {
    matches!(
        kind,
        ProviderErrorKind::Busy | ProviderErrorKind::Server | ProviderErrorKind::Timeout
    )
}

/// Map HTTP status codes to a provider error classification.
pub fn map_http_status(status: u16) -> ProviderErrorKind {
    match status {
        400 | 422 => ProviderErrorKind::InvalidRequest,
        401 | 403 => ProviderErrorKind::Authentication,
        404 => ProviderErrorKind::NotFound,
        408 => ProviderErrorKind::Timeout,
        429 => ProviderErrorKind::Busy,
        500 | 502 | 504 => ProviderErrorKind::Server,
        503 => ProviderErrorKind::Busy,
        _ => ProviderErrorKind::Other,
    }
}

/// One job's terminal failure inside a batch. Individual failures are
/// aggregated, never propagated on their own.
#[derive(Clone, Debug, thiserror::Error)]
pub enum JobFailure {
    #[error("provider unavailable: {0}")]
    Unavailable(ProviderError),
    #[error("job '{job_id}' did not finish within the polling budget")]
    Timeout { job_id: String },
    #[error("job '{job_id}' failed: {reason}")]
    Failed { job_id: String, reason: String },
    #[error("could not persist output of job '{job_id}': {message}")]
    Permanence { job_id: String, message: String },
    #[error("job '{job_id}' abandoned after cancellation")]
    Aborted { job_id: String },
}

/// Batch-level failures surfaced to the caller. Partial success is not an
/// error; it rides on the success result.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("generation quota exhausted")]
    QuotaExhausted,
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("no images produced: all {} jobs failed", failures.len())]
    NoImagesProduced { failures: Vec<JobFailure> },
}
