//! PostgreSQL storage backend for TenantLedger. Durable and safe to share
//! between processes: each transaction runs at READ COMMITTED and the
//! configuration primary key turns a lost version race into
//! `StorageError::VersionConflict`.

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};

use postgres::{error::SqlState, Client, NoTls, Row};
use rust_decimal::Decimal;
use time::Date;
use uuid::Uuid;

use tenantledger_core::{
    models::{format_date, parse_date},
    AccountData, AdditionalInfo, Configuration, PositionData, StorageBackend, StorageError,
    StorageTransaction, TransactionData, TransactionId,
};

pub struct PostgresStorage {
    client: Mutex<Client>,
    tx_counter: AtomicU64,
}

impl PostgresStorage {
    pub fn new(connection_string: &str) -> Result<Self, StorageError> {
        let client = Client::connect(connection_string, NoTls)
            .map_err(|e| StorageError::Other(format!("PostgreSQL connection failed: {}", e)))?;

        let storage = Self {
            client: Mutex::new(client),
            tx_counter: AtomicU64::new(1),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let mut client = self.client.lock().map_err(|_| StorageError::LockPoisoned)?;
        client
            .batch_execute(
                "
            CREATE TABLE IF NOT EXISTS configurations (
                name TEXT NOT NULL,
                tenant_name TEXT NOT NULL,
                version BIGINT NOT NULL,
                label TEXT NOT NULL,
                account_types TEXT NOT NULL,
                PRIMARY KEY (name, tenant_name, version)
            );

            CREATE TABLE IF NOT EXISTS accounts (
                account_number TEXT PRIMARY KEY,
                account_type TEXT NOT NULL,
                configuration_name TEXT NOT NULL,
                configuration_version BIGINT NOT NULL,
                tenant_name TEXT NOT NULL,
                additional_info TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS positions (
                account_number TEXT NOT NULL,
                position_type TEXT NOT NULL,
                amount TEXT NOT NULL,
                additional_info TEXT NOT NULL,
                PRIMARY KEY (account_number, position_type)
            );

            CREATE TABLE IF NOT EXISTS ledger_transactions (
                seq BIGSERIAL PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                account_number TEXT NOT NULL,
                transaction_id TEXT,
                amount TEXT NOT NULL,
                action_date TEXT,
                value_date TEXT,
                transaction_type TEXT,
                payment_id TEXT,
                system_generated BOOLEAN NOT NULL,
                additional_info TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pg_ledger_transactions_account
                ON ledger_transactions(account_number, seq);
            ",
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }
}

impl StorageBackend for PostgresStorage {
    fn begin_transaction(&self) -> Result<Box<dyn StorageTransaction + '_>, StorageError> {
        let mut client = self.client.lock().map_err(|_| StorageError::LockPoisoned)?;
        client
            .batch_execute("BEGIN ISOLATION LEVEL READ COMMITTED")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(tx_id, "PostgreSQL transaction started");
        Ok(Box::new(PostgresTransaction {
            tx_id,
            client,
            finished: false,
        }))
    }
}

struct PostgresTransaction<'a> {
    tx_id: TransactionId,
    client: MutexGuard<'a, Client>,
    finished: bool,
}

fn is_unique_violation(e: &postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

fn column<'r, T: postgres::types::FromSql<'r>>(row: &'r Row, idx: usize) -> Result<T, StorageError> {
    row.try_get(idx).map_err(|e| StorageError::Other(e.to_string()))
}

fn corrupt(table: &'static str, reason: String) -> StorageError {
    StorageError::CorruptRow { table, reason }
}

fn to_version(table: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| corrupt(table, format!("version {} out of range", v)))
}

fn parse_decimal(table: &'static str, s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| corrupt(table, format!("invalid decimal '{}': {}", s, e)))
}

fn parse_optional_date(table: &'static str, s: Option<String>) -> Result<Option<Date>, StorageError> {
    match s {
        Some(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| corrupt(table, format!("invalid date '{}'", s))),
        None => Ok(None),
    }
}

const CONFIGURATION_COLUMNS: &str = "name, tenant_name, version, label, account_types";

fn configuration_from_row(row: &Row) -> Result<Configuration, StorageError> {
    let account_types: String = column(row, 4)?;
    Ok(Configuration {
        name: column(row, 0)?,
        tenant_name: column(row, 1)?,
        version: to_version("configurations", column(row, 2)?)?,
        label: column(row, 3)?,
        account_types: serde_json::from_str(&account_types)?,
    })
}

fn account_from_row(row: &Row) -> Result<AccountData, StorageError> {
    let additional_info: String = column(row, 5)?;
    Ok(AccountData {
        account_number: column(row, 0)?,
        account_type: column(row, 1)?,
        configuration_name: column(row, 2)?,
        configuration_version: to_version("accounts", column(row, 3)?)?,
        tenant_name: column(row, 4)?,
        additional_info: serde_json::from_str(&additional_info)?,
    })
}

fn position_from_row(row: &Row) -> Result<PositionData, StorageError> {
    let amount: String = column(row, 2)?;
    let additional_info: String = column(row, 3)?;
    Ok(PositionData {
        account_number: column(row, 0)?,
        position_type: column(row, 1)?,
        amount: parse_decimal("positions", &amount)?,
        additional_info: serde_json::from_str(&additional_info)?,
    })
}

fn transaction_from_row(row: &Row) -> Result<TransactionData, StorageError> {
    const TABLE: &str = "ledger_transactions";
    let id: String = column(row, 0)?;
    let amount: String = column(row, 3)?;
    let additional_info: String = column(row, 9)?;
    Ok(TransactionData {
        id: Uuid::parse_str(&id).map_err(|e| corrupt(TABLE, format!("invalid id '{}': {}", id, e)))?,
        account_number: column(row, 1)?,
        transaction_id: column(row, 2)?,
        amount: parse_decimal(TABLE, &amount)?,
        action_date: parse_optional_date(TABLE, column(row, 4)?)?,
        value_date: parse_optional_date(TABLE, column(row, 5)?)?,
        transaction_type: column(row, 6)?,
        payment_id: column(row, 7)?,
        system_generated: column(row, 8)?,
        additional_info: serde_json::from_str(&additional_info)?,
    })
}

impl StorageTransaction for PostgresTransaction<'_> {
    fn id(&self) -> TransactionId {
        self.tx_id
    }

    fn list_configurations(&mut self) -> Result<Vec<Configuration>, StorageError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {} FROM configurations ORDER BY tenant_name COLLATE \"C\", name COLLATE \"C\", version",
                    CONFIGURATION_COLUMNS
                ),
                &[],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.iter().map(configuration_from_row).collect()
    }

    fn latest_configuration(&mut self, name: &str, tenant_name: Option<&str>) -> Result<Option<Configuration>, StorageError> {
        let row = match tenant_name {
            Some(tenant_name) => self.client.query_opt(
                &format!(
                    "SELECT {} FROM configurations
                     WHERE name = $1 AND tenant_name = $2
                     ORDER BY version DESC LIMIT 1",
                    CONFIGURATION_COLUMNS
                ),
                &[&name, &tenant_name],
            ),
            None => self.client.query_opt(
                &format!(
                    "SELECT {} FROM configurations
                     WHERE name = $1
                     ORDER BY version DESC, tenant_name COLLATE \"C\" ASC LIMIT 1",
                    CONFIGURATION_COLUMNS
                ),
                &[&name],
            ),
        }
        .map_err(|e| StorageError::Other(e.to_string()))?;

        row.as_ref().map(configuration_from_row).transpose()
    }

    fn insert_configuration(&mut self, configuration: &Configuration) -> Result<(), StorageError> {
        let account_types = serde_json::to_string(&configuration.account_types)?;
        let version = i64::from(configuration.version);
        self.client
            .execute(
                "INSERT INTO configurations (name, tenant_name, version, label, account_types)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &configuration.name,
                    &configuration.tenant_name,
                    &version,
                    &configuration.label,
                    &account_types,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::VersionConflict {
                        name: configuration.name.clone(),
                        tenant_name: configuration.tenant_name.clone(),
                        version: configuration.version,
                    }
                } else {
                    StorageError::Other(e.to_string())
                }
            })?;
        Ok(())
    }

    fn get_account(&mut self, account_number: &str) -> Result<Option<AccountData>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT account_number, account_type, configuration_name, configuration_version,
                        tenant_name, additional_info
                 FROM accounts WHERE account_number = $1",
                &[&account_number],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        row.as_ref().map(account_from_row).transpose()
    }

    fn insert_account(&mut self, account: &AccountData) -> Result<(), StorageError> {
        let additional_info = serde_json::to_string(&account.additional_info)?;
        let configuration_version = i64::from(account.configuration_version);
        self.client
            .execute(
                "INSERT INTO accounts (account_number, account_type, configuration_name,
                                       configuration_version, tenant_name, additional_info)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &account.account_number,
                    &account.account_type,
                    &account.configuration_name,
                    &configuration_version,
                    &account.tenant_name,
                    &additional_info,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::DuplicateAccount(account.account_number.clone())
                } else {
                    StorageError::Other(e.to_string())
                }
            })?;
        Ok(())
    }

    fn update_account_info(&mut self, account_number: &str, additional_info: &AdditionalInfo) -> Result<bool, StorageError> {
        let additional_info = serde_json::to_string(additional_info)?;
        let updated = self
            .client
            .execute(
                "UPDATE accounts SET additional_info = $2 WHERE account_number = $1",
                &[&account_number, &additional_info],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(updated > 0)
    }

    fn get_position(&mut self, account_number: &str, position_type: &str) -> Result<Option<PositionData>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT account_number, position_type, amount, additional_info
                 FROM positions WHERE account_number = $1 AND position_type = $2",
                &[&account_number, &position_type],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        row.as_ref().map(position_from_row).transpose()
    }

    fn upsert_position(&mut self, position: &PositionData) -> Result<(), StorageError> {
        let amount = position.amount.to_string();
        let additional_info = serde_json::to_string(&position.additional_info)?;
        self.client
            .execute(
                "INSERT INTO positions (account_number, position_type, amount, additional_info)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (account_number, position_type)
                 DO UPDATE SET amount = EXCLUDED.amount, additional_info = EXCLUDED.additional_info",
                &[
                    &position.account_number,
                    &position.position_type,
                    &amount,
                    &additional_info,
                ],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    fn list_positions(&mut self, account_number: &str) -> Result<Vec<PositionData>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT account_number, position_type, amount, additional_info
                 FROM positions WHERE account_number = $1
                 ORDER BY position_type COLLATE \"C\"",
                &[&account_number],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.iter().map(position_from_row).collect()
    }

    fn append_transaction(&mut self, transaction: &TransactionData) -> Result<(), StorageError> {
        let id = transaction.id.to_string();
        let amount = transaction.amount.to_string();
        let action_date = transaction.action_date.map(format_date);
        let value_date = transaction.value_date.map(format_date);
        let additional_info = serde_json::to_string(&transaction.additional_info)?;
        self.client
            .execute(
                "INSERT INTO ledger_transactions (id, account_number, transaction_id, amount,
                        action_date, value_date, transaction_type, payment_id,
                        system_generated, additional_info)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &id,
                    &transaction.account_number,
                    &transaction.transaction_id,
                    &amount,
                    &action_date,
                    &value_date,
                    &transaction.transaction_type,
                    &transaction.payment_id,
                    &transaction.system_generated,
                    &additional_info,
                ],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    fn list_transactions(&mut self, account_number: &str) -> Result<Vec<TransactionData>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT id, account_number, transaction_id, amount, action_date, value_date,
                        transaction_type, payment_id, system_generated, additional_info
                 FROM ledger_transactions WHERE account_number = $1
                 ORDER BY seq",
                &[&account_number],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.iter().map(transaction_from_row).collect()
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        self.client
            .batch_execute("COMMIT")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        self.finished = true;
        tracing::debug!(tx_id = self.tx_id, "PostgreSQL transaction committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.client
            .batch_execute("ROLLBACK")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        self.finished = true;
        tracing::debug!(tx_id = self.tx_id, "PostgreSQL transaction rolled back");
        Ok(())
    }
}

impl Drop for PostgresTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.client.batch_execute("ROLLBACK") {
            Ok(()) => tracing::debug!(tx_id = self.tx_id, "PostgreSQL transaction dropped, rolled back"),
            Err(e) => tracing::warn!(tx_id = self.tx_id, error = %e, "PostgreSQL rollback on drop failed"),
        }
    }
}
