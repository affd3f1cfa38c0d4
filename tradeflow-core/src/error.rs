use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("run not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing or invalid authorization credential")]
    Unauthenticated,

    #[error("authorization token does not match the configured secret")]
    Forbidden,

    #[error("internal API token is not configured on the service")]
    Misconfigured,

    #[error("pipeline failure: {0}")]
    Pipeline(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunError>;
