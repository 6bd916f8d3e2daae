//! Catalog-level errors

use sosdb_store::StoreError;
use thiserror::Error;

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Nothing matched the given identifier.
    #[error("invalid catalog id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("export failed: {0}")]
    Export(String),
}

impl CatalogError {
    pub fn is_invalid_id(&self) -> bool {
        matches!(self, Self::InvalidId(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_invalid_argument())
    }
}
