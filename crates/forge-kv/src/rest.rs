use crate::{KvStore, SetOptions, StoreError, StoreResult};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use std::time::Duration;

/// Lua script backing `compare_and_swap` on the REST backend. Compares the
/// stored text byte for byte. ARGV: expected text, new payload,
/// expect-absent flag, delete flag.
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
local expected = ARGV[1]
if ARGV[3] == '1' then expected = false end
if cur ~= expected then return 0 end
if ARGV[4] == '1' then
  redis.call('DEL', KEYS[1])
else
  redis.call('SET', KEYS[1], ARGV[2])
end
return 1
"#;

#[derive(Clone, Debug)]
pub struct RestKvConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl RestKvConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("KV_REST_API_URL").ok()?;
        let token = std::env::var("KV_REST_API_TOKEN").ok()?;
        Some(Self::new(base_url, token))
    }
}

/// Redis-over-REST backend (Upstash-style single-command endpoint).
///
/// Stored values are JSON text. A payload that does not parse as JSON is
/// surfaced as a plain string value so callers can run their own legacy
/// decoding against it.
#[derive(Clone)]
pub struct RestKv {
    client: reqwest::Client,
    config: RestKvConfig,
}

impl std::fmt::Debug for RestKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestKv")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

impl RestKv {
    pub fn new(config: RestKvConfig) -> StoreResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.token))
                .map_err(|error| StoreError::unavailable(format!("invalid token: {error}")))?,
        );
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| StoreError::unavailable(error.to_string()))?;
        Ok(Self { client, config })
    }

    async fn command(&self, command: Value) -> StoreResult<Value> {
        let response = self
            .client
            .post(self.config.base_url.trim_end_matches('/'))
            .json(&command)
            .send()
            .await
            .map_err(|error| StoreError::unavailable(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, "kv rest command failed");
            return Err(StoreError::unavailable(format!(
                "kv rest status {status}: {body}"
            )));
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|error| StoreError::unavailable(error.to_string()))?;
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(StoreError::unavailable(error.to_string()));
        }
        Ok(body
            .as_object_mut()
            .and_then(|obj| obj.remove("result"))
            .unwrap_or(Value::Null))
    }
}

#[async_trait]
impl KvStore for RestKv {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.get_text(key).await?.map(|raw| {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        }))
    }

    async fn get_text(&self, key: &str) -> StoreResult<Option<String>> {
        let result = self.command(json!(["GET", key])).await?;
        Ok(match result {
            Value::Null => None,
            Value::String(raw) => Some(raw),
            other => Some(other.to_string()),
        })
    }

    async fn set(&self, key: &str, value: Value, opts: SetOptions) -> StoreResult<()> {
        let payload = value.to_string();
        let command = match opts.ttl {
            Some(ttl) => json!(["SET", key, payload, "EX", ttl.as_secs().max(1)]),
            None => json!(["SET", key, payload]),
        };
        self.command(command).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.command(json!(["DEL", key])).await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&Value>,
    ) -> StoreResult<bool> {
        let expected_payload = expected.unwrap_or_default();
        let new_payload = new.map(Value::to_string).unwrap_or_default();
        let expect_absent = if expected.is_none() { "1" } else { "0" };
        let delete = if new.is_none() { "1" } else { "0" };
        let result = self
            .command(json!([
                "EVAL",
                CAS_SCRIPT,
                "1",
                key,
                expected_payload,
                new_payload,
                expect_absent,
                delete,
            ]))
            .await?;
        Ok(result.as_i64() == Some(1))
    }
}
