//! Storage implementations.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{StorageConfig, StorageType};
use crate::interfaces::{LedgerStore, StorageError};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryLedgerStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedgerStore;

/// Initialize the ledger store selected by configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn LedgerStore>, StorageError> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: in-memory");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!("Storage: sqlite at {}", config.sqlite.path);
            let store = SqliteLedgerStore::new(sqlite_pool(config).await?);
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::Unsupported("sqlite"))
        }
    }
}

#[cfg(feature = "sqlite")]
async fn sqlite_pool(config: &StorageConfig) -> Result<sqlx::SqlitePool, StorageError> {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    let path = config.sqlite.path.as_str();
    let in_memory = path == ":memory:";
    if !in_memory {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(config.lock_timeout());

    // Every connection to ":memory:" is its own database.
    let max_connections = if in_memory {
        1
    } else {
        config.sqlite.max_connections.max(1)
    };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(config.lock_timeout())
        .connect_with(options)
        .await
        .map_err(|e| {
            error!(path, error = %e, "Failed to open SQLite ledger");
            StorageError::from(e)
        })
}
