use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::types::{JobHandle, JobRequest, RawEnvelope};

/// Status field value the proxy uses while a job is still running.
const PROCESSING_STATUS: &str = "processing";

/// Parsed answer to a single status query.
#[derive(Debug, Clone, PartialEq)]
pub enum PollReply {
    Processing,
    Finished(RawEnvelope),
}

impl PollReply {
    /// `{"status": "processing"}` keeps the job pending; any other JSON
    /// body is the finished payload.
    pub fn classify(body: Value) -> Self {
        let processing = body
            .get("status")
            .and_then(|s| s.as_str())
            .is_some_and(|s| s == PROCESSING_STATUS);
        if processing {
            PollReply::Processing
        } else {
            PollReply::Finished(RawEnvelope::new(body))
        }
    }
}

/// The asynchronous job service behind the proxy.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit a search. Exactly one outbound request, no retry.
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle>;

    /// Query the current state of a submitted job.
    async fn status(&self, handle: &JobHandle) -> Result<PollReply>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    site_url: &'a str,
    tags: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(default)]
    response_id: Option<Value>,
}

/// reqwest-backed client for the job proxy (`POST /proxy`, `GET /reply`).
#[derive(Debug, Clone)]
pub struct HttpJobClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(cfg.http_client()?, cfg.proxy_base_url.clone()))
    }

    async fn read_json(resp: reqwest::Response, endpoint: &str) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            return Err(BridgeError::BackendRejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        let text = resp.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| BridgeError::malformed(format!("{endpoint} returned invalid JSON: {e}")))
    }
}

#[async_trait]
impl JobBackend for HttpJobClient {
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle> {
        let url = format!("{}/proxy", self.base_url);
        let body = SubmitBody {
            site_url: &request.target_url,
            tags: &request.keywords,
        };

        info!(site_url = %request.target_url, tags = %request.keywords, "Submitting search to {url}");
        let resp = self.client.post(&url).json(&body).send().await?;
        let value = Self::read_json(resp, "/proxy").await?;

        let parsed: SubmitResponse = serde_json::from_value(value)
            .map_err(|e| BridgeError::malformed(format!("/proxy response was not an object: {e}")))?;

        // Numeric ids are accepted as their decimal text.
        let job_id = match parsed.response_id {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        let handle = JobHandle::new(job_id)
            .ok_or_else(|| BridgeError::malformed("/proxy response has no responseId"))?;
        info!(job_id = %handle, "Search accepted");
        Ok(handle)
    }

    async fn status(&self, handle: &JobHandle) -> Result<PollReply> {
        let url = format!("{}/reply", self.base_url);
        debug!(job_id = %handle, "Polling {url}");

        let resp = self
            .client
            .get(&url)
            .query(&[("responseId", handle.job_id())])
            .send()
            .await?;
        let value = Self::read_json(resp, "/reply").await?;
        Ok(PollReply::classify(value))
    }
}
