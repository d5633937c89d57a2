//! Error types for the client tier.

use thiserror::Error;
use tunewatch_core::{FetchError, KvError, RetryError};

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unknown query: {key}")]
    UnknownQuery { key: String },
}

pub type ClientResult<T> = Result<T, ClientError>;
