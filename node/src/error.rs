use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("store error: {0}")]
    Store(#[from] whistle_store::StoreError),

    #[error("lmdb error: {0}")]
    Lmdb(#[from] whistle_store_lmdb::LmdbError),

    #[error("network error: {0}")]
    Network(#[from] whistle_network::NetworkError),

    #[error("index error: {0}")]
    Index(#[from] whistle_protocol::IndexError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown timeout")]
    ShutdownTimeout,

    #[error("{0}")]
    Other(String),
}
