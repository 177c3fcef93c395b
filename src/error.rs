use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayGuardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Not found: {0}")]
    NotFound(String),
}

impl RelayGuardError {
    /// Stable discriminant used for dead-letter error info and
    /// notification throttling keys.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayGuardError::Config(_) => "config",
            RelayGuardError::Io(_) => "io",
            RelayGuardError::Serialization(_) => "serialization",
            RelayGuardError::Yaml(_) => "yaml",
            RelayGuardError::Validation(_) => "validation",
            RelayGuardError::Dependency(_) => "dependency",
            RelayGuardError::Timeout(_) => "timeout",
            RelayGuardError::RateLimited(_) => "rate_limited",
            RelayGuardError::Redis(_) => "redis",
            RelayGuardError::ChannelSend => "channel_send",
            RelayGuardError::NotFound(_) => "not_found",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayGuardError>;
