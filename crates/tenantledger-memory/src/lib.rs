//! In-process storage backend: deterministic, non-persistent, for tests and
//! embedding.
//!
//! A transaction holds the state mutex from `begin_transaction` until it is
//! committed or dropped, so concurrent store operations are serialized and
//! version assignment cannot race. Writes go to a staged copy that replaces
//! the committed state on `commit`.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};

use tenantledger_core::{
    AccountData, AdditionalInfo, Configuration, PositionData, StorageBackend, StorageError,
    StorageTransaction, TransactionData, TransactionId,
};

#[derive(Clone, Default)]
struct MemoryState {
    // keyed (tenant_name, name, version)
    configurations: BTreeMap<(String, String, u32), Configuration>,
    accounts: BTreeMap<String, AccountData>,
    // keyed (account_number, position_type)
    positions: BTreeMap<(String, String), PositionData>,
    transactions: Vec<TransactionData>,
}

pub struct InMemoryStorage {
    state: Mutex<MemoryState>,
    tx_counter: AtomicU64,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            tx_counter: AtomicU64::new(1),
        }
    }
}

impl StorageBackend for InMemoryStorage {
    fn begin_transaction(&self) -> Result<Box<dyn StorageTransaction + '_>, StorageError> {
        let committed = self.state.lock().map_err(|_| StorageError::LockPoisoned)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(tx_id, "Transaction started");
        Ok(Box::new(MemoryTransaction {
            tx_id,
            committed,
            staged: None,
            finished: false,
        }))
    }
}

struct MemoryTransaction<'a> {
    tx_id: TransactionId,
    committed: MutexGuard<'a, MemoryState>,
    // copy-on-first-write
    staged: Option<MemoryState>,
    finished: bool,
}

impl MemoryTransaction<'_> {
    fn state(&self) -> &MemoryState {
        match &self.staged {
            Some(staged) => staged,
            None => &*self.committed,
        }
    }

    fn state_mut(&mut self) -> &mut MemoryState {
        let committed = &self.committed;
        self.staged.get_or_insert_with(|| MemoryState::clone(committed))
    }
}

impl StorageTransaction for MemoryTransaction<'_> {
    fn id(&self) -> TransactionId {
        self.tx_id
    }

    fn list_configurations(&mut self) -> Result<Vec<Configuration>, StorageError> {
        Ok(self.state().configurations.values().cloned().collect())
    }

    fn latest_configuration(&mut self, name: &str, tenant_name: Option<&str>) -> Result<Option<Configuration>, StorageError> {
        let latest = self
            .state()
            .configurations
            .values()
            .filter(|c| c.name == name && tenant_name.map_or(true, |t| c.tenant_name == t))
            .max_by(|a, b| {
                a.version
                    .cmp(&b.version)
                    .then_with(|| b.tenant_name.cmp(&a.tenant_name))
            })
            .cloned();
        Ok(latest)
    }

    fn insert_configuration(&mut self, configuration: &Configuration) -> Result<(), StorageError> {
        let key = (
            configuration.tenant_name.clone(),
            configuration.name.clone(),
            configuration.version,
        );
        let state = self.state_mut();
        if state.configurations.contains_key(&key) {
            return Err(StorageError::VersionConflict {
                name: configuration.name.clone(),
                tenant_name: configuration.tenant_name.clone(),
                version: configuration.version,
            });
        }
        state.configurations.insert(key, configuration.clone());
        Ok(())
    }

    fn get_account(&mut self, account_number: &str) -> Result<Option<AccountData>, StorageError> {
        Ok(self.state().accounts.get(account_number).cloned())
    }

    fn insert_account(&mut self, account: &AccountData) -> Result<(), StorageError> {
        let state = self.state_mut();
        if state.accounts.contains_key(&account.account_number) {
            return Err(StorageError::DuplicateAccount(account.account_number.clone()));
        }
        state.accounts.insert(account.account_number.clone(), account.clone());
        Ok(())
    }

    fn update_account_info(&mut self, account_number: &str, additional_info: &AdditionalInfo) -> Result<bool, StorageError> {
        match self.state_mut().accounts.get_mut(account_number) {
            Some(account) => {
                account.additional_info = additional_info.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_position(&mut self, account_number: &str, position_type: &str) -> Result<Option<PositionData>, StorageError> {
        let key = (account_number.to_string(), position_type.to_string());
        Ok(self.state().positions.get(&key).cloned())
    }

    fn upsert_position(&mut self, position: &PositionData) -> Result<(), StorageError> {
        let key = (position.account_number.clone(), position.position_type.clone());
        self.state_mut().positions.insert(key, position.clone());
        Ok(())
    }

    fn list_positions(&mut self, account_number: &str) -> Result<Vec<PositionData>, StorageError> {
        Ok(self
            .state()
            .positions
            .values()
            .filter(|p| p.account_number == account_number)
            .cloned()
            .collect())
    }

    fn append_transaction(&mut self, transaction: &TransactionData) -> Result<(), StorageError> {
        self.state_mut().transactions.push(transaction.clone());
        Ok(())
    }

    fn list_transactions(&mut self, account_number: &str) -> Result<Vec<TransactionData>, StorageError> {
        Ok(self
            .state()
            .transactions
            .iter()
            .filter(|t| t.account_number == account_number)
            .cloned()
            .collect())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Some(staged) = self.staged.take() {
            *self.committed = staged;
        }
        self.finished = true;
        tracing::debug!(tx_id = self.tx_id, "Transaction committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.staged = None;
        self.finished = true;
        tracing::debug!(tx_id = self.tx_id, "Transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(tx_id = self.tx_id, "Transaction dropped without commit, rolled back");
        }
    }
}
