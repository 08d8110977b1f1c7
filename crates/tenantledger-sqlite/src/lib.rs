//! SQLite storage backend for TenantLedger.

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use time::Date;
use uuid::Uuid;

use tenantledger_core::{
    models::{format_date, parse_date},
    AccountData, AdditionalInfo, Configuration, PositionData, StorageBackend, StorageError,
    StorageTransaction, TransactionData, TransactionId,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    tx_counter: AtomicU64,
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| StorageError::Other(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self {
            conn: Mutex::new(conn),
            tx_counter: AtomicU64::new(1),
        };
        storage.init_schema()?;
        tracing::debug!(path, "SQLite storage opened");
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS configurations (
                name TEXT NOT NULL,
                tenant_name TEXT NOT NULL,
                version INTEGER NOT NULL,
                label TEXT NOT NULL,
                account_types TEXT NOT NULL,
                PRIMARY KEY (name, tenant_name, version)
            );

            CREATE TABLE IF NOT EXISTS accounts (
                account_number TEXT PRIMARY KEY,
                account_type TEXT NOT NULL,
                configuration_name TEXT NOT NULL,
                configuration_version INTEGER NOT NULL,
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
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                account_number TEXT NOT NULL,
                transaction_id TEXT,
                amount TEXT NOT NULL,
                action_date TEXT,
                value_date TEXT,
                transaction_type TEXT,
                payment_id TEXT,
                system_generated INTEGER NOT NULL,
                additional_info TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_transactions_account
                ON ledger_transactions(account_number, seq);
            ",
        )
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }
}

impl StorageBackend for SqliteStorage {
    fn begin_transaction(&self) -> Result<Box<dyn StorageTransaction + '_>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        // IMMEDIATE takes the write lock up front so a concurrent process
        // cannot slip a version in between our read and insert.
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(tx_id, "SQLite transaction started");
        Ok(Box::new(SqliteTransaction {
            tx_id,
            conn,
            finished: false,
        }))
    }
}

struct SqliteTransaction<'a> {
    tx_id: TransactionId,
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation)
}

fn parse_decimal(table: &'static str, s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::CorruptRow {
        table,
        reason: format!("invalid decimal '{}': {}", s, e),
    })
}

fn parse_optional_date(table: &'static str, s: Option<String>) -> Result<Option<Date>, StorageError> {
    match s {
        Some(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| StorageError::CorruptRow {
                table,
                reason: format!("invalid date '{}'", s),
            }),
        None => Ok(None),
    }
}

fn to_version(table: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::CorruptRow {
        table,
        reason: format!("version {} out of range", v),
    })
}

type ConfigurationRow = (String, String, i64, String, String);

fn read_configuration_row(row: &rusqlite::Row) -> rusqlite::Result<ConfigurationRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_configuration((name, tenant_name, version, label, account_types): ConfigurationRow) -> Result<Configuration, StorageError> {
    Ok(Configuration {
        name,
        label,
        version: to_version("configurations", version)?,
        account_types: serde_json::from_str(&account_types)?,
        tenant_name,
    })
}

type PositionRow = (String, String, String, String);

fn into_position((account_number, position_type, amount, additional_info): PositionRow) -> Result<PositionData, StorageError> {
    Ok(PositionData {
        account_number,
        position_type,
        amount: parse_decimal("positions", &amount)?,
        additional_info: serde_json::from_str(&additional_info)?,
    })
}

struct TransactionRow {
    id: String,
    account_number: String,
    transaction_id: Option<String>,
    amount: String,
    action_date: Option<String>,
    value_date: Option<String>,
    transaction_type: Option<String>,
    payment_id: Option<String>,
    system_generated: bool,
    additional_info: String,
}

impl TransactionRow {
    fn read(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_number: row.get(1)?,
            transaction_id: row.get(2)?,
            amount: row.get(3)?,
            action_date: row.get(4)?,
            value_date: row.get(5)?,
            transaction_type: row.get(6)?,
            payment_id: row.get(7)?,
            system_generated: row.get(8)?,
            additional_info: row.get(9)?,
        })
    }

    fn into_transaction(self) -> Result<TransactionData, StorageError> {
        const TABLE: &str = "ledger_transactions";
        Ok(TransactionData {
            id: Uuid::parse_str(&self.id).map_err(|e| StorageError::CorruptRow {
                table: TABLE,
                reason: format!("invalid id '{}': {}", self.id, e),
            })?,
            account_number: self.account_number,
            transaction_id: self.transaction_id,
            amount: parse_decimal(TABLE, &self.amount)?,
            action_date: parse_optional_date(TABLE, self.action_date)?,
            value_date: parse_optional_date(TABLE, self.value_date)?,
            transaction_type: self.transaction_type,
            payment_id: self.payment_id,
            system_generated: self.system_generated,
            additional_info: serde_json::from_str(&self.additional_info)?,
        })
    }
}

impl StorageTransaction for SqliteTransaction<'_> {
    fn id(&self) -> TransactionId {
        self.tx_id
    }

    fn list_configurations(&mut self) -> Result<Vec<Configuration>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, tenant_name, version, label, account_types
                 FROM configurations
                 ORDER BY tenant_name, name, version",
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let rows = stmt
            .query_map([], read_configuration_row)
            .map_err(|e| StorageError::Other(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(into_configuration).collect()
    }

    fn latest_configuration(&mut self, name: &str, tenant_name: Option<&str>) -> Result<Option<Configuration>, StorageError> {
        let row = match tenant_name {
            Some(tenant_name) => self.conn.query_row(
                "SELECT name, tenant_name, version, label, account_types
                 FROM configurations
                 WHERE name = ?1 AND tenant_name = ?2
                 ORDER BY version DESC LIMIT 1",
                params![name, tenant_name],
                read_configuration_row,
            ),
            None => self.conn.query_row(
                "SELECT name, tenant_name, version, label, account_types
                 FROM configurations
                 WHERE name = ?1
                 ORDER BY version DESC, tenant_name ASC LIMIT 1",
                params![name],
                read_configuration_row,
            ),
        }
        .optional()
        .map_err(|e| StorageError::Other(e.to_string()))?;

        row.map(into_configuration).transpose()
    }

    fn insert_configuration(&mut self, configuration: &Configuration) -> Result<(), StorageError> {
        let account_types = serde_json::to_string(&configuration.account_types)?;
        self.conn
            .execute(
                "INSERT INTO configurations (name, tenant_name, version, label, account_types)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    configuration.name,
                    configuration.tenant_name,
                    configuration.version,
                    configuration.label,
                    account_types
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
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
            .conn
            .query_row(
                "SELECT account_number, account_type, configuration_name, configuration_version,
                        tenant_name, additional_info
                 FROM accounts WHERE account_number = ?1",
                params![account_number],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StorageError::Other(e.to_string()))?;

        match row {
            Some((account_number, account_type, configuration_name, configuration_version, tenant_name, additional_info)) => {
                Ok(Some(AccountData {
                    account_number,
                    account_type,
                    configuration_name,
                    configuration_version: to_version("accounts", configuration_version)?,
                    tenant_name,
                    additional_info: serde_json::from_str(&additional_info)?,
                }))
            }
            None => Ok(None),
        }
    }

    fn insert_account(&mut self, account: &AccountData) -> Result<(), StorageError> {
        let additional_info = serde_json::to_string(&account.additional_info)?;
        self.conn
            .execute(
                "INSERT INTO accounts (account_number, account_type, configuration_name,
                                       configuration_version, tenant_name, additional_info)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    account.account_number,
                    account.account_type,
                    account.configuration_name,
                    account.configuration_version,
                    account.tenant_name,
                    additional_info
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
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
            .conn
            .execute(
                "UPDATE accounts SET additional_info = ?2 WHERE account_number = ?1",
                params![account_number, additional_info],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(updated > 0)
    }

    fn get_position(&mut self, account_number: &str, position_type: &str) -> Result<Option<PositionData>, StorageError> {
        let row: Option<PositionRow> = self
            .conn
            .query_row(
                "SELECT account_number, position_type, amount, additional_info
                 FROM positions WHERE account_number = ?1 AND position_type = ?2",
                params![account_number, position_type],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        row.map(into_position).transpose()
    }

    fn upsert_position(&mut self, position: &PositionData) -> Result<(), StorageError> {
        let additional_info = serde_json::to_string(&position.additional_info)?;
        self.conn
            .execute(
                "INSERT INTO positions (account_number, position_type, amount, additional_info)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (account_number, position_type)
                 DO UPDATE SET amount = excluded.amount, additional_info = excluded.additional_info",
                params![
                    position.account_number,
                    position.position_type,
                    position.amount.to_string(),
                    additional_info
                ],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    fn list_positions(&mut self, account_number: &str) -> Result<Vec<PositionData>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT account_number, position_type, amount, additional_info
                 FROM positions WHERE account_number = ?1
                 ORDER BY position_type",
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let rows: Vec<PositionRow> = stmt
            .query_map(params![account_number], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .map_err(|e| StorageError::Other(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(into_position).collect()
    }

    fn append_transaction(&mut self, transaction: &TransactionData) -> Result<(), StorageError> {
        let additional_info = serde_json::to_string(&transaction.additional_info)?;
        self.conn
            .execute(
                "INSERT INTO ledger_transactions (id, account_number, transaction_id, amount,
                        action_date, value_date, transaction_type, payment_id,
                        system_generated, additional_info)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    transaction.id.to_string(),
                    transaction.account_number,
                    transaction.transaction_id,
                    transaction.amount.to_string(),
                    transaction.action_date.map(format_date),
                    transaction.value_date.map(format_date),
                    transaction.transaction_type,
                    transaction.payment_id,
                    transaction.system_generated,
                    additional_info
                ],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    fn list_transactions(&mut self, account_number: &str) -> Result<Vec<TransactionData>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, account_number, transaction_id, amount, action_date, value_date,
                        transaction_type, payment_id, system_generated, additional_info
                 FROM ledger_transactions WHERE account_number = ?1
                 ORDER BY seq",
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let rows = stmt
            .query_map(params![account_number], TransactionRow::read)
            .map_err(|e| StorageError::Other(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        self.finished = true;
        tracing::debug!(tx_id = self.tx_id, "SQLite transaction committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        self.finished = true;
        tracing::debug!(tx_id = self.tx_id, "SQLite transaction rolled back");
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::debug!(tx_id = self.tx_id, "SQLite transaction dropped, rolled back"),
            Err(e) => tracing::warn!(tx_id = self.tx_id, error = %e, "SQLite rollback on drop failed"),
        }
    }
}
