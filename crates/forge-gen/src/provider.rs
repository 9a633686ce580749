use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Validated design request for one generation batch. Every job in the
/// batch shares these parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl JobRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: 768,
            height: 768,
        }
    }
}

/// Opaque provider-side job identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobHandle(pub String);

#[derive(Clone, Debug, PartialEq)]
pub enum JobState {
    Pending,
    Succeeded { output_url: String },
    Failed { reason: String },
}

/// Asynchronous image generation provider: submit a job, poll it by handle.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn create_job(&self, request: &JobRequest) -> Result<JobHandle, ProviderError>;
    async fn get_job(&self, handle: &JobHandle) -> Result<JobState, ProviderError>;
}

/// Image permanence provider: trade a short-lived provider URL for a
/// durable one.
#[async_trait]
pub trait PermanenceProvider: Send + Sync {
    async fn store(&self, temporary_url: &str) -> Result<String, ProviderError>;
}
