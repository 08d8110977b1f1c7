//! Tenant-scoped versioned configurations and account ledgers over a
//! pluggable storage backend.

pub mod account_store;
pub mod cli;
pub mod config;
pub mod configuration_store;
pub mod logging;
pub mod session;
pub mod storage;

pub use account_store::{AccountLedgerStore, ReconcileOutcome};
pub use configuration_store::ConfigurationStore;
pub use tenantledger_core::{
    AccountData, AccountType, AccountView, AdditionalInfo, Configuration, NewAccount, NewConfiguration,
    NewTransaction, PositionData, SessionContext, SessionUpdate, TransactionData, DEFAULT_TENANT,
};
