//! Error type for parsing and validating shared types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid transaction id: {0}")]
    InvalidId(String),

    #[error("invalid peer url: {0}")]
    InvalidUrl(String),

    #[error("alert sink failed: {0}")]
    AlertSink(String),
}
