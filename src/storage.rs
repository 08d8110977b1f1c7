use std::sync::Arc;

// Re-export core storage types so callers only need this crate
pub use tenantledger_core::storage::{StorageBackend, StorageError, StorageTransaction, TransactionId};
pub use tenantledger_memory::InMemoryStorage;
pub use tenantledger_postgres::PostgresStorage;
pub use tenantledger_sqlite::SqliteStorage;

use crate::config::{BackendKind, StorageConfig};

/// Opens the backend selected in `[storage]`.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let storage: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::Memory => Arc::new(InMemoryStorage::new()),
        BackendKind::Sqlite => Arc::new(SqliteStorage::new(&config.path)?),
        BackendKind::Postgres => {
            let url = config.url.as_deref().ok_or_else(|| {
                StorageError::Other("storage.url is required for the postgres backend".to_string())
            })?;
            Arc::new(PostgresStorage::new(url)?)
        }
    };
    tracing::info!(backend = ?config.backend, "Storage opened");
    Ok(storage)
}

/// Runs `f` in one storage transaction: committed when `f` succeeds, rolled
/// back when it fails. The error from `f` is what the caller sees.
pub fn in_transaction<'s, T, F>(storage: &'s dyn StorageBackend, f: F) -> Result<T, StorageError>
where
    F: FnOnce(&mut (dyn StorageTransaction + 's)) -> Result<T, StorageError>,
{
    let mut tx = storage.begin_transaction()?;
    match f(&mut *tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            let tx_id = tx.id();
            if let Err(rollback_err) = tx.rollback() {
                tracing::warn!(tx_id, error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}
