use thiserror::Error;

#[derive(Error, Debug)]
pub enum PsmError {
    #[error("invalid store: {0}")]
    InvalidStore(String),
    #[error("data fetch error: {0}")]
    DataFetchError(String),
    #[error("data suspected corrupt: {0}")]
    DataSuspected(String),
    #[error("config error: {0}")]
    ConfigError(String),
    #[error("storage error: {0}")]
    StorageError(String),
}
