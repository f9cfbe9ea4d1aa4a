use thiserror::Error;

/// Rejected monitor options. Raised at construction; no monitor is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("active monitoring requires a non-empty heartbeat URL")]
    MissingHeartbeatUrl,
    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeatInterval,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid monitor configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),
    /// Active monitoring needs a Tokio runtime to host the probe task.
    #[error("no Tokio runtime available to schedule heartbeat probes")]
    NoRuntime,
}
