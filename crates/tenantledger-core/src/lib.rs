//! Core types and traits for TenantLedger storage backends.
//!
//! This crate provides the `StorageBackend` trait, the record types it moves
//! around, and the per-unit-of-work `SessionContext`, so that storage
//! implementations can live in separate crates.

pub mod models;
pub mod session;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{AccountData, AccountType, AdditionalInfo, Configuration, PositionData, TransactionData};
pub use models::write::{NewAccount, NewConfiguration, NewTransaction};
pub use models::read::AccountView;
pub use session::{resolve_tenant, SessionContext, SessionUpdate, DEFAULT_TENANT};
pub use storage::{StorageBackend, StorageError, StorageTransaction, TransactionId};
