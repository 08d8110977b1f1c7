use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Deserialize;
use time::Date;

#[derive(Parser, Debug)]
#[command(name = "tenantledger", about = "TenantLedger - versioned tenant configurations and account ledgers")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "tenantledger.toml")]
    pub config: String,

    /// Storage backend (overrides config file)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// SQLite database path (overrides config file)
    #[arg(long)]
    pub database: Option<String>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Tenant for this invocation
    #[arg(short, long)]
    pub tenant: Option<String>,

    #[arg(long)]
    pub user_id: Option<String>,

    #[arg(long)]
    pub user_name: Option<String>,

    /// Value date, YYYY-MM-DD (defaults to today)
    #[arg(long, value_parser = parse_date_arg)]
    pub value_date: Option<Date>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Versioned configuration snapshots
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Accounts, positions and transactions
    #[command(subcommand)]
    Account(AccountCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// List every stored version
    List,

    /// Show the latest version of a configuration in the session's tenant
    Get {
        name: String,

        /// Search every tenant instead
        #[arg(long)]
        all_tenants: bool,
    },

    /// Store the next version of a configuration
    Save {
        name: String,

        #[arg(long)]
        label: String,

        /// Account types as a JSON array
        #[arg(long, default_value = "[]")]
        account_types: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Create an account
    Create {
        account_number: String,

        #[arg(long = "type")]
        account_type: String,

        #[arg(long)]
        config_name: String,

        #[arg(long)]
        config_version: u32,

        /// Additional info as a JSON object
        #[arg(long, default_value = "{}")]
        info: String,
    },

    /// Show an account with its positions and transactions
    Show { account_number: String },

    /// Replace an account's additional info
    SetInfo { account_number: String, info: String },

    /// Set a position and optionally append a transaction
    Post {
        account_number: String,

        #[arg(long)]
        position: String,

        #[arg(long)]
        amount: Decimal,

        /// Amount of the transaction to append with the position
        #[arg(long)]
        txn_amount: Option<Decimal>,

        #[arg(long)]
        txn_type: Option<String>,

        #[arg(long)]
        txn_id: Option<String>,

        #[arg(long)]
        payment_id: Option<String>,
    },
}

fn parse_date_arg(s: &str) -> Result<Date, String> {
    tenantledger_core::models::parse_date(s).ok_or_else(|| format!("'{}' is not a YYYY-MM-DD date", s))
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// SQLite file, or ":memory:"
    #[serde(default = "default_path")]
    pub path: String,

    /// Postgres connection string
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

/// Defaults for the session built at the start of each invocation.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub tenant_name: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub user_name: Option<String>,
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_path() -> String {
    "tenantledger.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: BackendKind::default(),
            path: default_path(),
            url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        default_logging()
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(backend) = cli.backend {
            config.storage.backend = backend;
        }
        if let Some(ref path) = cli.database {
            config.storage.path = path.clone();
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref tenant) = cli.tenant {
            config.session.tenant_name = Some(tenant.clone());
        }
        if let Some(ref user_id) = cli.user_id {
            config.session.user_id = Some(user_id.clone());
        }
        if let Some(ref user_name) = cli.user_name {
            config.session.user_name = Some(user_name.clone());
        }

        config
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
