use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use medvoice_core::session::CredentialProvider;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct TokenResponse {
    key: String,
}

/// Fetches a short-lived agent key from an HTTP endpoint before every
/// connection attempt. The endpoint answers `{"key": "..."}`.
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpCredentialProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self) -> Result<SecretString> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to reach credential endpoint")?
            .error_for_status()
            .context("Credential endpoint returned an error")?;
        let token: TokenResponse = response
            .json()
            .await
            .context("Credential endpoint returned malformed JSON")?;
        if token.key.is_empty() {
            bail!("Credential endpoint returned an empty key");
        }
        debug!(url = %self.url, "Fetched agent credential");
        Ok(SecretString::from(token.key))
    }
}
