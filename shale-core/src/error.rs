use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShaleError>;

#[derive(Debug, Error)]
pub enum ShaleError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid chunk key: {0}")]
    InvalidKey(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for ShaleError {
    fn from(err: rusqlite::Error) -> Self {
        ShaleError::StoreUnavailable(err.to_string())
    }
}
