use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid port specification: {0}")]
    InvalidPortSpec(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
