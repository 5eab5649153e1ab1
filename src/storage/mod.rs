//! Storage backends for telemetry persistence
//!
//! This module provides a trait-based abstraction over the stores the
//! pipeline writes to: the time series, the latest-value table, alerts,
//! dead letters and window aggregates.
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with WAL mode
//! - **In-Memory**: No persistence, for tests and `backend: none`
//!
//! ## Usage
//!
//! ```no_run
//! use plant_telemetry::config::StorageConfig;
//! use plant_telemetry::storage::open_backend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = open_backend(&StorageConfig::default()).await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use crate::config::StorageConfig;

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, QueryRange, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;

/// Build the backend described by `config`
pub async fn open_backend(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::None => Ok(Arc::new(MemoryBackend::new())),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Ok(Arc::new(sqlite::SqliteBackend::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
