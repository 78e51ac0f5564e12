use async_trait::async_trait;
use secrecy::SecretString;

/// Supplies the opaque token used to open a transport. Asked again on
/// every connection attempt, so short-lived tokens stay fresh.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<SecretString>;
}

/// A fixed credential, e.g. an API key read from the environment.
#[derive(Debug, Clone)]
pub struct StaticCredential(SecretString);

impl StaticCredential {
    pub fn new(secret: SecretString) -> Self {
        Self(secret)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn fetch(&self) -> anyhow::Result<SecretString> {
        Ok(self.0.clone())
    }
}
