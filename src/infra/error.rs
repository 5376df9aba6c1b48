use thiserror::Error;

use crate::config::LoadError;

/// Process-level failures of the demo server.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("server stopped unexpectedly: {0}")]
    Serve(#[source] std::io::Error),
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
