use thiserror::Error;

use crate::types::{AgentId, AgentRole};

/// Main error type for benchmark operations
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("topology setup failed: {0}")]
    Setup(String),

    #[error("publish failed: {0}")]
    Publish(#[from] PlatformError),

    #[error("metrics collection failed: {0}")]
    Collection(String),

    #[error("publisher pool failed: {0}")]
    PublisherPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl BenchError {
    /// Short machine-readable code, copied onto `LevelError::code` when a level fails
    pub fn error_code(&self) -> &'static str {
        match self {
            BenchError::Config(_) => "config",
            BenchError::Setup(_) => "setup",
            BenchError::Publish(_) => "publish",
            BenchError::Collection(_) => "collection",
            BenchError::PublisherPool(_) => "publisher_pool",
            BenchError::Io(_) => "io_error",
            BenchError::Json(_) => "internal_error",
            BenchError::TomlParse(_) => "config",
        }
    }

    /// Get the exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::Config(_) => 2,
            BenchError::TomlParse(_) => 2,
            BenchError::Setup(_) => 3,
            _ => 1,
        }
    }
}

/// Errors raised by the agent platform being benchmarked
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("agent {id} is a {actual}, expected {expected}")]
    RoleMismatch {
        id: AgentId,
        expected: AgentRole,
        actual: AgentRole,
    },

    #[error("agent {0} rejected the event")]
    Rejected(AgentId),

    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, BenchError>;
