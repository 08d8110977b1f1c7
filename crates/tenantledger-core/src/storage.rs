use thiserror::Error;

use crate::models::{AccountData, AdditionalInfo, Configuration, PositionData, TransactionData};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Other(String),
    #[error("account already exists: {0}")]
    DuplicateAccount(String),
    #[error("configuration '{name}' for tenant '{tenant_name}' already has version {version}")]
    VersionConflict {
        name: String,
        tenant_name: String,
        version: u32,
    },
    #[error("record for account {found} passed while creating account {account_number}")]
    AccountMismatch { account_number: String, found: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// A conflicting concurrent writer won the race; re-running the whole
    /// operation reads the new state and may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::VersionConflict { .. })
    }
}

pub type TransactionId = u64;

/// Entry point of a storage substrate. Every store operation runs inside
/// exactly one transaction obtained here.
pub trait StorageBackend: Send + Sync {
    fn begin_transaction(&self) -> Result<Box<dyn StorageTransaction + '_>, StorageError>;
}

/// Narrow capability set the stores are written against.
///
/// Writes become visible to other transactions only after `commit`. Dropping
/// a transaction without committing rolls it back.
pub trait StorageTransaction {
    fn id(&self) -> TransactionId;

    fn list_configurations(&mut self) -> Result<Vec<Configuration>, StorageError>;
    /// Highest version of `name`, restricted to `tenant_name` when given.
    /// Unscoped ties on version go to the lexically smallest tenant.
    fn latest_configuration(&mut self, name: &str, tenant_name: Option<&str>) -> Result<Option<Configuration>, StorageError>;
    /// Fails with `VersionConflict` when (name, tenant_name, version) exists.
    fn insert_configuration(&mut self, configuration: &Configuration) -> Result<(), StorageError>;

    fn get_account(&mut self, account_number: &str) -> Result<Option<AccountData>, StorageError>;
    /// Fails with `DuplicateAccount` when the account number exists.
    fn insert_account(&mut self, account: &AccountData) -> Result<(), StorageError>;
    /// Returns false when there is no such account.
    fn update_account_info(&mut self, account_number: &str, additional_info: &AdditionalInfo) -> Result<bool, StorageError>;

    fn get_position(&mut self, account_number: &str, position_type: &str) -> Result<Option<PositionData>, StorageError>;
    fn upsert_position(&mut self, position: &PositionData) -> Result<(), StorageError>;
    /// Ordered by position type.
    fn list_positions(&mut self, account_number: &str) -> Result<Vec<PositionData>, StorageError>;

    fn append_transaction(&mut self, transaction: &TransactionData) -> Result<(), StorageError>;
    /// Ordered by append sequence.
    fn list_transactions(&mut self, account_number: &str) -> Result<Vec<TransactionData>, StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;
    fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
