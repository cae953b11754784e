//! CredentialProvider port - authentication context for remote job services.
//!
//! Passed explicitly into the executor context. Acquired at startup, refreshed
//! by the implementation as needed, dropped with the orchestrator.

use async_trait::async_trait;

use crate::error::ExecutorError;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Bearer token for the named remote service (e.g. `"encore"`).
    async fn access_token(&self, service: &str) -> Result<String, ExecutorError>;
}
