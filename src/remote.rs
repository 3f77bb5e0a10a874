//! HTTP client for the remote deployment.
//!
//! All endpoints return JSON in a `{success, data}` envelope. Calls are
//! retried with exponential backoff (1s, 2s, 4s, ... capped at 32s); a
//! `429` triggers a longer, attempt-indexed wait instead of the generic
//! backoff. A 4xx other than 429 fails immediately. Independent of
//! retries, a fixed minimum delay is enforced between consecutive
//! requests so bulk pushes never trip remote throttling. Every request
//! carries the client-level timeout, so an unreachable remote cannot
//! stall a run indefinitely.

use anyhow::{anyhow, bail, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RemoteConfig;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCompetitor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFeature {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteScreenshot {
    pub id: String,
    pub competitor_id: String,
    #[serde(default)]
    pub feature_id: Option<String>,
    pub file_name: String,
    pub file_size: i64,
    #[serde(default)]
    pub url: Option<String>,
}

pub struct RemoteSyncClient {
    http: reqwest::Client,
    config: RemoteConfig,
    last_request: Mutex<Option<Instant>>,
}

impl RemoteSyncClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            last_request: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Enforce the minimum inter-request delay.
    async fn throttle(&self) {
        let min_delay = Duration::from_millis(self.config.min_delay_ms);
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < min_delay {
                tokio::time::sleep(min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> Result<reqwest::RequestBuilder>,
    {
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 1..=self.config.max_attempts {
            self.throttle().await;

            match build()?.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 {
                        last_err = Some(anyhow!("rate limited (429)"));
                        if attempt < self.config.max_attempts {
                            let wait = self.config.rate_limit_wait_secs * attempt as u64;
                            tokio::time::sleep(Duration::from_secs(wait)).await;
                        }
                        continue;
                    }

                    if status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("server error {}: {}", status, body));
                        if attempt < self.config.max_attempts {
                            tokio::time::sleep(backoff(attempt)).await;
                        }
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body = response.text().await.unwrap_or_default();
                    bail!("request failed {}: {}", status, body);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("request failed after retries")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .send_with_retry(|| Ok(self.http.get(&url)))
            .await?;
        let envelope: Envelope<T> = response.json().await?;
        unwrap_envelope(envelope)
    }

    pub async fn fetch_competitors(&self) -> Result<Vec<RemoteCompetitor>> {
        self.get_json("/competitors").await
    }

    pub async fn fetch_features(&self) -> Result<Vec<RemoteFeature>> {
        self.get_json("/features").await
    }

    pub async fn fetch_screenshots(&self, limit: u32) -> Result<Vec<RemoteScreenshot>> {
        self.get_json(&format!("/screenshots?limit={}", limit)).await
    }

    /// Check whether a remote record's blob is actually fetchable.
    /// A 404 means the DB row exists but the object is gone.
    pub async fn blob_available(&self, url: &str) -> Result<bool> {
        self.throttle().await;
        let response = self.http.get(url).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        if response.status().is_success() {
            return Ok(true);
        }
        bail!("blob check failed with {}", response.status())
    }

    /// Upload a screenshot. With `restore`, the `/screenshots/restore`
    /// path is used: the remote row is kept and only the blob replaced,
    /// avoiding a second record for the same logical asset.
    pub async fn upload_screenshot(
        &self,
        restore: bool,
        bytes: &[u8],
        file_name: &str,
        mime_type: &str,
        competitor_id: &str,
        feature_id: Option<&str>,
    ) -> Result<RemoteScreenshot> {
        let path = if restore {
            "/screenshots/restore"
        } else {
            "/screenshots"
        };
        let url = self.url(path);

        let bytes = bytes.to_vec();
        let response = self
            .send_with_retry(|| {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.to_string())
                    .mime_str(mime_type)?;
                let mut form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("competitorId", competitor_id.to_string());
                if let Some(feature_id) = feature_id {
                    form = form.text("featureId", feature_id.to_string());
                }
                Ok(self.http.post(&url).multipart(form))
            })
            .await?;

        let envelope: Envelope<RemoteScreenshot> = response.json().await?;
        unwrap_envelope(envelope)
    }

    /// Reassign a remote screenshot's feature classification.
    pub async fn reassign_feature(&self, remote_id: &str, feature_id: Option<&str>) -> Result<()> {
        let url = self.url(&format!("/screenshots/{}/feature", remote_id));
        let body = serde_json::json!({ "featureId": feature_id });
        let response = self
            .send_with_retry(|| Ok(self.http.put(&url).json(&body)))
            .await?;
        let envelope: Envelope<serde_json::Value> = response.json().await?;
        if !envelope.success {
            bail!(
                "remote rejected feature reassignment: {}",
                envelope.error.unwrap_or_default()
            );
        }
        Ok(())
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T> {
    if !envelope.success {
        bail!(
            "remote returned an error: {}",
            envelope.error.unwrap_or_else(|| "unknown".to_string())
        );
    }
    envelope
        .data
        .ok_or_else(|| anyhow!("remote response missing data"))
}

/// Generic backoff for attempt n (1-based): 1s, 2s, 4s, ... capped at 32s.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}
