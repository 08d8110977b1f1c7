use std::sync::Arc;

use prettytable::{row, Table};
use serde::Serialize;
use tenantledger_core::{
    resolve_tenant, AccountType, Configuration, NewAccount, NewConfiguration, NewTransaction, PositionData, SessionContext,
    DEFAULT_TENANT,
};
use thiserror::Error;
use time::OffsetDateTime;

use crate::account_store::AccountLedgerStore;
use crate::config::{AccountCommand, CliArgs, Command, Config, ConfigCommand};
use crate::configuration_store::ConfigurationStore;
use crate::session;
use crate::storage::{open_storage, StorageBackend, StorageError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid JSON for {field}: {source}")]
    InvalidJson {
        field: &'static str,
        source: serde_json::Error,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Opens storage, installs the invocation's session and runs one subcommand.
pub fn run(cli: &CliArgs, config: &Config) -> Result<(), CliError> {
    let storage = open_storage(&config.storage)?;
    let context = session_context(cli, config);
    tracing::debug!(tenant = %context.tenant_name, user = %context.user_id, "Session installed");
    session::scoped(context, || dispatch(cli, storage))
}

fn session_context(cli: &CliArgs, config: &Config) -> SessionContext {
    let today = OffsetDateTime::now_utc().date();
    SessionContext::new(
        config.session.tenant_name.as_deref().unwrap_or(DEFAULT_TENANT),
        today,
        cli.value_date.unwrap_or(today),
        config.session.user_id.as_deref().unwrap_or(""),
        config.session.user_name.as_deref().unwrap_or(""),
    )
}

fn dispatch(cli: &CliArgs, storage: Arc<dyn StorageBackend>) -> Result<(), CliError> {
    let context = session::get();
    match &cli.command {
        Command::Config(command) => {
            let store = ConfigurationStore::new(storage);
            run_config(cli, &store, command, context.as_ref())
        }
        Command::Account(command) => {
            let store = AccountLedgerStore::new(storage);
            run_account(cli, &store, command, context.as_ref())
        }
    }
}

fn run_config(
    cli: &CliArgs,
    store: &ConfigurationStore,
    command: &ConfigCommand,
    context: Option<&SessionContext>,
) -> Result<(), CliError> {
    match command {
        ConfigCommand::List => {
            let all = store.get_all()?;
            emit(cli.json, &all, || configuration_table(&all))
        }
        ConfigCommand::Get { name, all_tenants } => {
            let shown = [latest_configuration(store, name, *all_tenants, context)?];
            emit(cli.json, &shown[0], || configuration_table(&shown))
        }
        ConfigCommand::Save {
            name,
            label,
            account_types,
        } => {
            let account_types: Vec<AccountType> = parse_json("account_types", account_types)?;
            let saved = store.save_in_current_session(
                NewConfiguration::new(name.as_str(), label.as_str()).with_account_types(account_types),
            )?;
            let shown = [saved];
            emit(cli.json, &shown[0], || configuration_table(&shown))
        }
    }
}

/// Latest version in the session's tenant, or in any tenant when asked.
fn latest_configuration(
    store: &ConfigurationStore,
    name: &str,
    all_tenants: bool,
    context: Option<&SessionContext>,
) -> Result<Configuration, CliError> {
    let latest = if all_tenants {
        store.get_latest_by_name(name)?
    } else {
        store.get_latest_for_tenant(name, &resolve_tenant(None, context))?
    };
    latest.ok_or_else(|| CliError::NotFound(format!("configuration '{}'", name)))
}

fn run_account(
    cli: &CliArgs,
    store: &AccountLedgerStore,
    command: &AccountCommand,
    context: Option<&SessionContext>,
) -> Result<(), CliError> {
    match command {
        AccountCommand::Create {
            account_number,
            account_type,
            config_name,
            config_version,
            info,
        } => {
            let info = parse_json("info", info)?;
            let account = NewAccount::new(account_number.as_str(), account_type.as_str(), config_name.as_str(), *config_version)
                .with_info(info);
            let created = store.create_account(account, Vec::new(), Vec::new(), context)?;
            emit(cli.json, &created, || format!("Created account {} for tenant {}", created.account_number, created.tenant_name))
        }
        AccountCommand::Show { account_number } => {
            let view = store.get_account_data(account_number)?;
            if !view.exists() {
                return Err(CliError::NotFound(format!("account '{}'", account_number)));
            }
            emit(cli.json, &view, || view.to_string())
        }
        AccountCommand::SetInfo { account_number, info } => {
            let info = parse_json("info", info)?;
            if !store.update_account_additional_info(account_number, info)? {
                return Err(CliError::NotFound(format!("account '{}'", account_number)));
            }
            emit(cli.json, &true, || format!("Updated account {}", account_number))
        }
        AccountCommand::Post {
            account_number,
            position,
            amount,
            txn_amount,
            txn_type,
            txn_id,
            payment_id,
        } => {
            let positions = vec![PositionData::new(account_number.as_str(), position.as_str(), *amount)];
            let mut transactions = Vec::new();
            if let Some(txn_amount) = txn_amount {
                let mut txn = NewTransaction::new(account_number.as_str(), *txn_amount);
                if let Some(txn_type) = txn_type {
                    txn = txn.with_type(txn_type.as_str());
                }
                if let Some(txn_id) = txn_id {
                    txn = txn.with_transaction_id(txn_id.as_str());
                }
                if let Some(payment_id) = payment_id {
                    txn = txn.with_payment_id(payment_id.as_str());
                }
                transactions.push(txn);
            }
            let outcome = store.create_transactions(positions, transactions, context)?;
            emit(cli.json, &outcome, || {
                format!(
                    "Positions: {} inserted, {} updated. Transactions appended: {}",
                    outcome.inserted_positions,
                    outcome.updated_positions,
                    outcome.transactions.len()
                )
            })
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(field: &'static str, raw: &str) -> Result<T, CliError> {
    serde_json::from_str(raw).map_err(|source| CliError::InvalidJson { field, source })
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn configuration_table(configurations: &[Configuration]) -> String {
    let mut table = Table::new();
    table.add_row(row!["Tenant", "Name", "Version", "Label", "Account types"]);
    table.add_empty_row();
    for c in configurations {
        let types: Vec<&str> = c.account_types.iter().map(|t| t.name.as_str()).collect();
        table.add_row(row![c.tenant_name, c.name, c.version, c.label, types.join(", ")]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use clap::Parser;

    fn memory_config(cli: &CliArgs) -> Config {
        let mut config = Config::load(cli);
        config.storage.backend = BackendKind::Memory;
        config
    }

    #[test]
    fn test_show_unknown_account_is_not_found() {
        let cli = CliArgs::parse_from(["tenantledger", "--config", "/nonexistent.toml", "account", "show", "A1"]);
        match run(&cli, &memory_config(&cli)) {
            Err(CliError::NotFound(what)) => assert!(what.contains("A1")),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_json_is_reported_by_field() {
        let cli = CliArgs::parse_from([
            "tenantledger",
            "--config",
            "/nonexistent.toml",
            "config",
            "save",
            "rules",
            "--label",
            "Rules",
            "--account-types",
            "not json",
        ]);
        match run(&cli, &memory_config(&cli)) {
            Err(CliError::InvalidJson { field, .. }) => assert_eq!(field, "account_types"),
            other => panic!("Expected InvalidJson, got {:?}", other),
        }
    }

    fn seeded_store() -> ConfigurationStore {
        let store = ConfigurationStore::new(Arc::new(crate::storage::InMemoryStorage::new()));
        for tenant in ["acme", "acme", "globex"] {
            store
                .save(NewConfiguration::new("rules", tenant).with_tenant(tenant), None)
                .unwrap();
        }
        store
    }

    fn get_args(extra: &[&str]) -> CliArgs {
        let mut args = vec!["tenantledger", "--config", "/nonexistent.toml"];
        args.extend_from_slice(extra);
        CliArgs::parse_from(args)
    }

    #[test]
    fn test_config_get_stays_in_session_tenant() {
        let store = seeded_store();
        let cli = get_args(&["--tenant", "globex", "config", "get", "rules"]);
        let globex = session_context(&cli, &memory_config(&cli));

        let latest = latest_configuration(&store, "rules", false, Some(&globex)).unwrap();
        assert_eq!(latest.tenant_name, "globex");
        assert_eq!(latest.version, 1);

        // acme holds the higher version, visible only across tenants
        let any = latest_configuration(&store, "rules", true, Some(&globex)).unwrap();
        assert_eq!(any.tenant_name, "acme");
        assert_eq!(any.version, 2);
    }

    #[test]
    fn test_config_get_misses_other_tenants() {
        let store = seeded_store();
        let cli = get_args(&["config", "get", "rules"]);
        let default = session_context(&cli, &memory_config(&cli));
        match latest_configuration(&store, "rules", false, Some(&default)) {
            Err(CliError::NotFound(what)) => assert!(what.contains("rules")),
            result => panic!("Expected NotFound, got {:?}", result),
        }
    }

    #[test]
    fn test_all_tenants_flag_parses() {
        let cli = get_args(&["config", "get", "rules", "--all-tenants"]);
        match &cli.command {
            Command::Config(ConfigCommand::Get { name, all_tenants }) => {
                assert_eq!(name, "rules");
                assert!(*all_tenants);
            }
            other => panic!("Expected config get, got {:?}", other),
        }
    }

    #[test]
    fn test_save_prints_and_succeeds() {
        let cli = CliArgs::parse_from([
            "tenantledger",
            "--config",
            "/nonexistent.toml",
            "--json",
            "config",
            "save",
            "rules",
            "--label",
            "Rules",
        ]);
        assert!(run(&cli, &memory_config(&cli)).is_ok());
    }
}
