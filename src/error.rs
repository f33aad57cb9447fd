//! Error types for the provisioning engine

use thiserror::Error;

/// Provisioner result type
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that can occur while provisioning
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Transient cloud provider failure (network, API throttling)
    #[error("provider error: {0}")]
    Provider(String),

    /// Persistent store failure
    #[error("store error: {0}")]
    Store(String),

    /// A job's requirements cannot be satisfied by any instance type
    #[error("no eligible instance type for job {0}")]
    NoEligibleInstance(String),

    /// Malformed workload or catalog data
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Configuration error detected at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the operation may help
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider(_))
    }
}
