//! Prediction-API provider adapter (Replicate-style REST shape: create a
//! prediction, poll it by id).

use crate::error::{ProviderError, ProviderErrorKind, map_http_status};
use crate::provider::{GenerationProvider, JobHandle, JobRequest, JobState};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ReplicateConfig {
    pub api_token: String,
    pub base_url: String,
    /// Pinned model version the logo pipeline runs against.
    pub model_version: String,
    pub timeout: Duration,
}

impl ReplicateConfig {
    pub fn new(api_token: impl Into<String>, model_version: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            base_url: "https://api.replicate.com/v1".to_string(),
            model_version: model_version.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Option<Self> {
        let api_token = std::env::var("REPLICATE_API_TOKEN").ok()?;
        let model_version = std::env::var("REPLICATE_MODEL_VERSION").ok()?;
        let mut config = Self::new(api_token, model_version);
        if let Ok(base_url) = std::env::var("REPLICATE_BASE_URL") {
            config.base_url = base_url;
        }
        Some(config)
    }
}

#[derive(Clone)]
pub struct ReplicateProvider {
    client: reqwest::Client,
    config: ReplicateConfig,
}

impl std::fmt::Debug for ReplicateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateProvider")
            .field("base_url", &self.config.base_url)
            .field("model_version", &self.config.model_version)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

impl ReplicateProvider {
    pub fn new(config: ReplicateConfig) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Token {}", config.api_token)).map_err(|error| {
                ProviderError::new(
                    ProviderErrorKind::Authentication,
                    format!("invalid api token header: {error}"),
                )
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                ProviderError::new(ProviderErrorKind::Other, error.to_string())
            })?;
        Ok(Self { client, config })
    }

    fn predictions_url(&self) -> String {
        format!("{}/predictions", self.config.base_url.trim_end_matches('/'))
    }

    async fn fail_from_response(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<f64>().ok());
        let body = response.text().await.unwrap_or_default();
        let kind = map_http_status(status);
        let mut error = ProviderError::new(kind, format!("provider status {status}: {body}"))
            .with_status(status);
        error.retry_after = retry_after;
        error
    }
}

fn network_error(error: reqwest::Error) -> ProviderError {
    let kind = if error.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Server
    };
    ProviderError::new(kind, error.to_string())
}

/// Pull the first output URL from a prediction body. Providers return
/// either a bare string or an array of URLs.
fn first_output_url(body: &Value) -> Option<String> {
    match body.get("output") {
        Some(Value::String(url)) => Some(url.clone()),
        Some(Value::Array(urls)) => urls
            .iter()
            .find_map(|url| url.as_str().map(str::to_string)),
        _ => None,
    }
}

#[async_trait]
impl GenerationProvider for ReplicateProvider {
    async fn create_job(&self, request: &JobRequest) -> Result<JobHandle, ProviderError> {
        let body = json!({
            "version": self.config.model_version,
            "input": {
                "prompt": request.prompt,
                "negative_prompt": request.negative_prompt,
                "width": request.width,
                "height": request.height,
            },
        });
        let response = self
            .client
            .post(self.predictions_url())
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(Self::fail_from_response(response).await);
        }

        let body: Value = response.json().await.map_err(network_error)?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::new(ProviderErrorKind::Other, "prediction response missing id")
            })?;
        Ok(JobHandle(id.to_string()))
    }

    async fn get_job(&self, handle: &JobHandle) -> Result<JobState, ProviderError> {
        let url = format!("{}/{}", self.predictions_url(), handle.0);
        let response = self.client.get(url).send().await.map_err(network_error)?;

        if !response.status().is_success() {
            return Err(Self::fail_from_response(response).await);
        }

        let body: Value = response.json().await.map_err(network_error)?;
        let status = body.get("status").and_then(Value::as_str).unwrap_or("");
        match status {
            "starting" | "processing" => Ok(JobState::Pending),
            "succeeded" => match first_output_url(&body) {
                Some(output_url) => Ok(JobState::Succeeded { output_url }),
                None => Ok(JobState::Failed {
                    reason: "succeeded without output".to_string(),
                }),
            },
            "failed" | "canceled" => Ok(JobState::Failed {
                reason: body
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown provider failure")
                    .to_string(),
            }),
            other => Err(ProviderError::new(
                ProviderErrorKind::Other,
                format!("unexpected prediction status {other:?}"),
            )),
        }
    }
}
