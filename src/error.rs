use thiserror::Error;

pub type PalletDBResult<T, E = PalletDBError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum PalletDBError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}
