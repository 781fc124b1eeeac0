//! Asset errors.

use fleetwire_core::{Coded, ErrorCode};
use thiserror::Error;

pub type AssetResult<T> = Result<T, AssetError>;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Invalid asset module id: {0}")]
    UnknownModule(String),

    #[error("Asset module already registered: {0}")]
    DuplicateModule(String),

    #[error("Asset source error: {0}")]
    Source(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid asset data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Asset error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Coded for AssetError {
    fn code(&self) -> ErrorCode {
        match self {
            AssetError::UnknownModule(_) => ErrorCode::UnknownAssetModule,
            AssetError::DuplicateModule(_) => ErrorCode::DuplicateAssetModule,
            AssetError::Source(_) | AssetError::Io(_) | AssetError::Parse(_) => {
                ErrorCode::AssetSourceFailed
            }
            AssetError::Other(_) => ErrorCode::Internal,
        }
    }
}
