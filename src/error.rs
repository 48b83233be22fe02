//! Error taxonomy for passes and reports.

use crate::client::ClientError;
use crate::db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing credential or unusable configuration. Aborts before any work.
    #[error("configuration error: {0}")]
    Config(String),

    /// The completion service returned a result that breaks the contract.
    #[error("contract violation in `{field}`: {message}")]
    Contract { field: String, message: String },

    #[error(transparent)]
    Client(ClientError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("corpus error: {0}")]
    Corpus(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn contract(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Contract {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Config(msg) => Error::Config(msg),
            other => Error::Client(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
