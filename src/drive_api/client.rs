use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{RequestBuilder, Response};

use crate::auth::TokenManager;
use crate::config::RetryConfig;

use super::types::DriveApiError;

const API_BASE: &str = "https://www.googleapis.com/drive/v2";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v2";

/// Deterministic exponential backoff: base, doubling per retry, capped.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay(&self, retry: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let cap_ms = self.cap.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = retry.min(16);
        Duration::from_millis(base_ms.saturating_mul(1u64 << shift).min(cap_ms))
    }
}

/// Retry policy applied to every network-calling Drive operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff: Backoff::new(
                Duration::from_secs(cfg.backoff_base_secs),
                Duration::from_secs(cfg.backoff_cap_secs),
            ),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::new(Duration::from_secs(2), Duration::from_secs(30)),
        }
    }
}

pub struct DriveClient {
    http: reqwest::Client,
    token_manager: Arc<TokenManager>,
    retry: RetryPolicy,
}

impl DriveClient {
    pub fn new(token_manager: Arc<TokenManager>, retry: RetryPolicy) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            token_manager,
            retry,
        }
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{API_BASE}{path}")
    }

    pub(crate) fn upload_url(&self, path: &str) -> String {
        format!("{UPLOAD_BASE}{path}")
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Run one Drive API operation under the retry policy.
    ///
    /// `build` produces a fresh request for each attempt (bodies cannot be
    /// reused once sent). Retried on transport failures and on any
    /// non-success API response; after the last attempt the original error
    /// is returned to the caller.
    pub(crate) async fn execute<F>(&self, operation: &'static str, build: F) -> Result<Response>
    where
        F: Fn() -> Result<RequestBuilder>,
    {
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let wait = self.retry.backoff.delay(attempt - 1);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    error = %last_err.as_ref().map(|e| format!("{e:#}")).unwrap_or_default(),
                    "retrying in {wait:?}"
                );
                tokio::time::sleep(wait).await;
            }

            let token = self.token_manager.get_access_token().await?;
            let request = build()?;

            match request.bearer_auth(&token).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    let err = match serde_json::from_str::<DriveApiError>(&body) {
                        Ok(api_err) => anyhow::anyhow!("{operation}: {api_err}"),
                        Err(_) => anyhow::anyhow!("{operation}: HTTP {status}: {body}"),
                    };
                    last_err = Some(err);
                }
                Err(e) => {
                    last_err =
                        Some(anyhow::Error::new(e).context(format!("{operation}: request failed")));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{operation}: no attempts were made")))
    }

    /// GET /about — returns the authenticated account's display name.
    /// Used by `drivesyncd auth` and the startup credential check.
    pub async fn about(&self) -> Result<String> {
        let url = self.api_url("/about");
        let resp = self
            .execute("fetch account info", || {
                Ok(self.http.get(&url).query(&[("fields", "name,user")]))
            })
            .await?;

        #[derive(serde::Deserialize)]
        struct About {
            name: String,
        }

        let about: About = resp
            .json()
            .await
            .context("Failed to parse /about response")?;
        Ok(about.name)
    }
}
