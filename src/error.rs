use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("platform returned {status}: {message}")]
    Platform { status: u16, message: String },

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("event bus error: {0}")]
    Bus(String),
}

pub type Result<T> = std::result::Result<T, Error>;
