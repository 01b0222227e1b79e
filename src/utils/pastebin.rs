use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// Best-effort sink for redacted error dumps. Callers swallow failures; a
/// diagnostic that cannot be uploaded must never break delivery handling.
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    /// Uploads the payload and returns a URL at which it can be viewed.
    async fn upload(&self, payload: &Value) -> Result<String>;
}

pub struct PastebinClient {
    client: Client,
    endpoint: String,
}

impl PastebinClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DiagnosticSink for PastebinClient {
    async fn upload(&self, payload: &Value) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| anyhow!("pastebin upload failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("pastebin upload failed: status {}", status));
        }

        let key = response
            .text()
            .await
            .map_err(|e| anyhow!("pastebin response unreadable: {}", e))?;
        let url = format!("{}/{}.json", self.endpoint, key.trim());
        debug!("diagnostic uploaded to {}", url);
        Ok(url)
    }
}
