//! Image permanence adapter: uploads a provider's short-lived output URL to
//! the hosting service and returns the durable URL.

use crate::error::{ProviderError, ProviderErrorKind, map_http_status};
use crate::provider::PermanenceProvider;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::RwLock,
    time::Duration,
};

#[derive(Clone, Debug)]
pub struct PermanenceConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl PermanenceConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("IMAGE_HOST_ENDPOINT").ok()?;
        let api_key = std::env::var("IMAGE_HOST_API_KEY").ok()?;
        Some(Self::new(endpoint, api_key))
    }
}

/// HTTP permanence provider with a write-once URL cache. The cache is
/// purely additive: racing writers recompute the same mapping, so the last
/// insert is harmless.
pub struct HttpPermanence {
    client: reqwest::Client,
    config: PermanenceConfig,
    cache: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for HttpPermanence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPermanence")
            .field("endpoint", &self.config.endpoint)
            .field("cached", &self.cache.read().unwrap().len())
            .finish()
    }
}

impl HttpPermanence {
    pub fn new(config: PermanenceConfig) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|error| {
                ProviderError::new(
                    ProviderErrorKind::Authentication,
                    format!("invalid api key header: {error}"),
                )
            })?,
        );
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| ProviderError::new(ProviderErrorKind::Other, error.to_string()))?;
        Ok(Self {
            client,
            config,
            cache: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl PermanenceProvider for HttpPermanence {
    async fn store(&self, temporary_url: &str) -> Result<String, ProviderError> {
        if let Some(durable) = self.cache.read().unwrap().get(temporary_url) {
            return Ok(durable.clone());
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&json!({ "url": temporary_url }))
            .send()
            .await
            .map_err(|error| {
                ProviderError::new(ProviderErrorKind::Server, error.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                map_http_status(status),
                format!("upload status {status}: {body}"),
            )
            .with_status(status));
        }

        let body: Value = response.json().await.map_err(|error| {
            ProviderError::new(ProviderErrorKind::Server, error.to_string())
        })?;
        let durable = body
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::new(ProviderErrorKind::Other, "upload response missing url")
            })?
            .to_string();

        self.cache
            .write()
            .unwrap()
            .insert(temporary_url.to_string(), durable.clone());
        tracing::debug!(temporary_url, durable_url = %durable, "image made durable");
        Ok(durable)
    }
}
