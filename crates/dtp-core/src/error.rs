use thiserror::Error;

#[derive(Error, Debug)]
pub enum DtpError {
    #[error("Executor not found: {0}")]
    NotFound(String),

    #[error("Invalid executor properties: {0}")]
    Validation(String),

    #[error("Unknown rejection policy: {0}")]
    UnknownPolicy(String),

    #[error("Queue {queue_type} does not support capacity change (executor: {executor})")]
    CapacityMismatch { executor: String, queue_type: String },

    #[error("Invalid pool size: {0}")]
    InvalidSize(String),

    #[error("Task rejected by executor: {0}")]
    Rejected(String),

    #[error("Executor is shut down: {0}")]
    Shutdown(String),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
