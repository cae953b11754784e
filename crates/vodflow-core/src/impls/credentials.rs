use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ExecutorError;
use crate::ports::CredentialProvider;

/// Fixed per-service tokens, for deployments that inject long-lived
/// tokens through the environment, and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    tokens: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, service: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.insert(service.into(), token.into());
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self, service: &str) -> Result<String, ExecutorError> {
        self.tokens
            .get(service)
            .cloned()
            .ok_or_else(|| ExecutorError::Remote(format!("no credentials configured for {service}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_configured_token_only() {
        let creds = StaticCredentials::new().with_token("encore", "secret");
        assert_eq!(creds.access_token("encore").await.unwrap(), "secret");
        assert!(creds.access_token("shaka").await.is_err());
    }
}
