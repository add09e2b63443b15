mod token_store;

pub use token_store::{load_tokens, resolve_token_path, save_tokens, TokenData};

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::config::Config;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub struct TokenManager {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
    tokens: Mutex<Option<TokenData>>,
    http_client: reqwest::Client,
}

impl TokenManager {
    pub fn new(config: &Config) -> Result<Self> {
        let token_path = token_store::resolve_token_path(config.auth.token_path.as_deref())?;
        let tokens = if token_path.exists() {
            match token_store::load_tokens(&token_path) {
                Ok(t) => {
                    tracing::info!("loaded existing tokens");
                    Some(t)
                }
                Err(e) => {
                    tracing::warn!("failed to load tokens: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        if tokens.is_none() {
            tracing::warn!("not authenticated — run `drivesyncd auth --import <file>` first");
        }

        Ok(Self {
            client_id: config.auth.client_id.clone(),
            client_secret: config.auth.client_secret.clone(),
            token_path,
            tokens: Mutex::new(tokens),
            http_client: reqwest::Client::new(),
        })
    }

    /// Import a token file obtained out of band and persist it at the
    /// configured location.
    pub async fn import_tokens(&self, tokens: TokenData) -> Result<()> {
        token_store::save_tokens(&self.token_path, &tokens)?;
        *self.tokens.lock().await = Some(tokens);
        Ok(())
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_access_token(&self) -> Result<String> {
        let mut guard = self.tokens.lock().await;
        let tokens = guard
            .as_mut()
            .context("Not authenticated. Run `drivesyncd auth --import <file>` first.")?;

        // Refresh if token expires within 60 seconds
        let now = chrono::Utc::now();
        let buffer = chrono::Duration::seconds(60);
        if tokens.expires_at <= now + buffer {
            tracing::debug!("access token expired or expiring soon, refreshing");
            let refreshed = self.refresh(tokens).await?;
            *tokens = refreshed;
            token_store::save_tokens(&self.token_path, tokens)?;
            tracing::debug!("token refreshed successfully");
        }

        Ok(tokens.access_token.clone())
    }

    async fn refresh(&self, tokens: &TokenData) -> Result<TokenData> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
            // Google only returns a new refresh token on the initial grant;
            // refresh responses usually omit it.
            refresh_token: Option<String>,
            expires_in: u64,
        }

        let resp = self
            .http_client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .context("Failed to contact the OAuth token endpoint")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Token refresh failed ({status}): {body}\n\
                 You may need to re-import credentials with `drivesyncd auth --import`"
            );
        }

        let tr: TokenResponse = resp
            .json()
            .await
            .context("Failed to parse token response")?;
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(tr.expires_in as i64);

        Ok(TokenData {
            access_token: tr.access_token,
            refresh_token: tr
                .refresh_token
                .unwrap_or_else(|| tokens.refresh_token.clone()),
            expires_at,
        })
    }
}
