use super::{OperationRequest, PlatformRecord, RemoteService, StartResponse, StatusResponse};
use crate::error::RemoteError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Percent-encode a path segment or query value.
pub(crate) fn encode_param(s: &str) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => {
                let _ = write!(out, "%{:02X}", b);
            }
        }
    }
    out
}

/// REST client for the orchestration service.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    client: Client,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/platforms", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn status_url(&self, operation_id: &str) -> String {
        format!(
            "{}/status?operation={}",
            self.base_url,
            encode_param(operation_id)
        )
    }

    fn platform_url(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if !ns.trim().is_empty() => {
                format!("{}/platform/{}", self.base_url, encode_param(ns.trim()))
            }
            _ => format!("{}/platform", self.base_url),
        }
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(RemoteError::from_body(status.as_u16(), &text));
    }
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| RemoteError::Decode(e.to_string()))
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn start_operation(
        &self,
        request: &OperationRequest,
    ) -> Result<StartResponse, RemoteError> {
        let kind = request.kind();
        let body = request
            .body()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        debug!("POST {} {}", kind.endpoint(), body);
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, kind.endpoint()))
            .json(&body)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn operation_status(&self, operation_id: &str) -> Result<StatusResponse, RemoteError> {
        let resp = self.client.get(self.status_url(operation_id)).send().await?;
        read_json(resp).await
    }

    async fn platform(&self, namespace: Option<&str>) -> Result<PlatformRecord, RemoteError> {
        let resp = self.client.get(self.platform_url(namespace)).send().await?;
        read_json(resp).await
    }

    async fn platforms(&self) -> Result<Vec<PlatformRecord>, RemoteError> {
        let resp = self
            .client
            .get(format!("{}/platforms", self.base_url))
            .send()
            .await?;
        read_json(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_param_escapes_reserved_bytes() {
        assert_eq!(encode_param("op/1 2"), "op%2F1%202");
        assert_eq!(encode_param("abc-_.~"), "abc-_.~");
    }

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let remote = HttpRemote::with_client("http://localhost:8080/", Client::new());
        assert_eq!(remote.base_url(), "http://localhost:8080");
        assert_eq!(
            remote.status_url("operations/abc"),
            "http://localhost:8080/status?operation=operations%2Fabc"
        );
        assert_eq!(
            remote.platform_url(Some("team-a")),
            "http://localhost:8080/platform/team-a"
        );
        assert_eq!(remote.platform_url(None), "http://localhost:8080/platform");
        assert_eq!(remote.platform_url(Some(" ")), "http://localhost:8080/platform");
    }
}
