use std::sync::Arc;

use serde::Serialize;
use tenantledger_core::{
    resolve_tenant, AccountData, AccountView, AdditionalInfo, NewAccount, NewTransaction, PositionData, SessionContext,
    TransactionData,
};
use uuid::Uuid;

use crate::storage::{in_transaction, StorageBackend, StorageError};

/// What `create_transactions` wrote.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReconcileOutcome {
    pub inserted_positions: usize,
    pub updated_positions: usize,
    /// The appended records, with their generated ids and stamped dates.
    pub transactions: Vec<TransactionData>,
}

/// Accounts, their current positions, and their append-only transaction log.
pub struct AccountLedgerStore {
    storage: Arc<dyn StorageBackend>,
}

impl AccountLedgerStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Creates the account with its opening positions and transactions in a
    /// single storage transaction. Nothing is written if any part fails.
    ///
    /// Every opening position and transaction must belong to the new account;
    /// otherwise `StorageError::AccountMismatch` is returned.
    pub fn create_account(
        &self,
        account: NewAccount,
        positions: Vec<PositionData>,
        transactions: Vec<NewTransaction>,
        session: Option<&SessionContext>,
    ) -> Result<AccountData, StorageError> {
        let foreign = positions
            .iter()
            .map(|p| &p.account_number)
            .chain(transactions.iter().map(|t| &t.account_number))
            .find(|number| **number != account.account_number);
        if let Some(found) = foreign {
            return Err(StorageError::AccountMismatch {
                account_number: account.account_number.clone(),
                found: found.clone(),
            });
        }

        let tenant_name = resolve_tenant(account.tenant_name.as_deref(), session);
        let account = account.into_account(tenant_name);
        let records = stamp(transactions, session);

        in_transaction(self.storage.as_ref(), |tx| {
            tx.insert_account(&account)?;
            for position in &positions {
                tx.upsert_position(position)?;
            }
            for record in &records {
                tx.append_transaction(record)?;
            }
            Ok(())
        })?;

        tracing::info!(
            account = %account.account_number,
            tenant = %account.tenant_name,
            positions = positions.len(),
            transactions = records.len(),
            "Account created"
        );
        Ok(account)
    }

    /// Replaces the account's additional info. Returns false if there is no
    /// such account.
    pub fn update_account_additional_info(
        &self,
        account_number: &str,
        additional_info: AdditionalInfo,
    ) -> Result<bool, StorageError> {
        let updated = in_transaction(self.storage.as_ref(), |tx| {
            tx.update_account_info(account_number, &additional_info)
        })?;
        if !updated {
            tracing::debug!(account = %account_number, "Additional info not updated, no such account");
        }
        Ok(updated)
    }

    /// Upserts each position by (account, position type) and appends each
    /// transaction, all or nothing. Accounts are not checked for existence.
    pub fn create_transactions(
        &self,
        positions: Vec<PositionData>,
        transactions: Vec<NewTransaction>,
        session: Option<&SessionContext>,
    ) -> Result<ReconcileOutcome, StorageError> {
        let records = stamp(transactions, session);

        let (inserted_positions, updated_positions) = in_transaction(self.storage.as_ref(), |tx| {
            let mut inserted = 0;
            let mut updated = 0;
            for position in &positions {
                match tx.get_position(&position.account_number, &position.position_type)? {
                    Some(_) => updated += 1,
                    None => inserted += 1,
                }
                tx.upsert_position(position)?;
            }
            for record in &records {
                tx.append_transaction(record)?;
            }
            Ok((inserted, updated))
        })?;

        tracing::debug!(
            inserted_positions,
            updated_positions,
            transactions = records.len(),
            "Positions reconciled"
        );
        Ok(ReconcileOutcome {
            inserted_positions,
            updated_positions,
            transactions: records,
        })
    }

    /// The account, its positions and its transactions, read in one storage
    /// transaction. An unknown number yields an empty view, even when
    /// `create_transactions` wrote rows under it.
    pub fn get_account_data(&self, account_number: &str) -> Result<AccountView, StorageError> {
        in_transaction(self.storage.as_ref(), |tx| {
            let Some(account) = tx.get_account(account_number)? else {
                return Ok(AccountView::default());
            };
            Ok(AccountView {
                account: Some(account),
                positions: tx.list_positions(account_number)?,
                transactions: tx.list_transactions(account_number)?,
            })
        })
    }
}

fn stamp(transactions: Vec<NewTransaction>, session: Option<&SessionContext>) -> Vec<TransactionData> {
    transactions
        .into_iter()
        .map(|t| t.into_record(Uuid::new_v4(), session))
        .collect()
}
