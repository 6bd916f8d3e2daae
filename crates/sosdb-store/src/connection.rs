//! Connection handle shared by every component
//!
//! Constructed once at process start and passed around by reference; there
//! is no module-level client.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{Backend, DuckDbBackend, MemoryBackend};
use crate::error::{Result, StoreError};

/// Where a connection URI points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Memory,
    DuckDb(PathBuf),
}

impl Target {
    /// Parse `memory`, `memory://`, `duckdb://<path>` or a bare path.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(StoreError::invalid("empty connection URI"));
        }
        if uri == "memory" || uri == "memory://" {
            return Ok(Self::Memory);
        }
        if let Some(path) = uri.strip_prefix("duckdb://") {
            if path.is_empty() {
                return Err(StoreError::invalid("duckdb:// URI without a path"));
            }
            return Ok(Self::DuckDb(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = uri.split_once("://") {
            return Err(StoreError::invalid(format!(
                "unsupported connection scheme `{scheme}://`"
            )));
        }
        Ok(Self::DuckDb(PathBuf::from(uri)))
    }
}

/// Cloneable handle to an open backend.
#[derive(Clone)]
pub struct Connection {
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.backend.describe())
            .finish()
    }
}

impl Connection {
    pub fn open(uri: &str) -> Result<Self> {
        let backend: Arc<dyn Backend> = match Target::parse(uri)? {
            Target::Memory => Arc::new(MemoryBackend::new()),
            Target::DuckDb(path) => Arc::new(DuckDbBackend::open(&path)?),
        };
        log::debug!("connected to {}", backend.describe());
        Ok(Self { backend })
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Whether the store answers. Connectivity failures are logged and
    /// reported as `false` rather than raised.
    pub fn ping(&self) -> bool {
        match self.backend.ping() {
            Ok(()) => true,
            Err(e) => {
                log::error!("connection to {} failed: {e}", self.backend.describe());
                false
            }
        }
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}
