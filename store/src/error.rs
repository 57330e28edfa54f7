use thiserror::Error;

/// Failures surfaced by a watchdog store backend. Absent rows are `Ok(None)`,
/// and conditional writes that do not apply report `false`, so neither is
/// an error here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("row encoding error: {0}")]
    Serialization(String),

    #[error("store is corrupted: {0}")]
    Corruption(String),
}
