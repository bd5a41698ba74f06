use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArmpError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown source system: {0}")]
    UnknownSource(String),

    #[error("Unknown organization: {0}")]
    UnknownOrganization(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ArmpError>;
