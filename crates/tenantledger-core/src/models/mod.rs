use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, Month};
use uuid::Uuid;

pub mod read;
pub mod write;

/// Caller-defined structured payload. Stored and returned as-is; nothing in
/// the stores looks inside it.
pub type AdditionalInfo = serde_json::Value;

pub fn empty_info() -> AdditionalInfo {
    AdditionalInfo::Object(serde_json::Map::new())
}

/// Account type metadata as validated by the domain-model layer. Only `name`
/// and `label` are named here; any other attributes ride along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountType {
    pub name: String,
    pub label: String,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl AccountType {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            attributes: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    pub label: String,
    pub version: u32,
    pub account_types: Vec<AccountType>,
    pub tenant_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountData {
    pub account_number: String,
    pub account_type: String,
    pub configuration_name: String,
    pub configuration_version: u32,
    pub tenant_name: String,
    pub additional_info: AdditionalInfo,
}

/// Current balance of one position of an account. One row per
/// (account_number, position_type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionData {
    pub account_number: String,
    pub position_type: String,
    pub amount: Decimal,
    pub additional_info: AdditionalInfo,
}

impl PositionData {
    pub fn new(account_number: impl Into<String>, position_type: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_number: account_number.into(),
            position_type: position_type.into(),
            amount,
            additional_info: empty_info(),
        }
    }

    pub fn with_info(mut self, additional_info: AdditionalInfo) -> Self {
        self.additional_info = additional_info;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionData {
    pub id: Uuid,
    pub account_number: String,
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub action_date: Option<Date>,
    pub value_date: Option<Date>,
    pub transaction_type: Option<String>,
    pub payment_id: Option<String>,
    pub system_generated: bool,
    pub additional_info: AdditionalInfo,
}

/// `YYYY-MM-DD`, the text form dates are stored in.
pub fn format_date(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month() as u8, d.day())
}

pub fn parse_date(s: &str) -> Option<Date> {
    let mut parts = s.trim().splitn(3, '-');
    let year = parts.next()?.parse::<i32>().ok()?;
    let month = parts.next()?.parse::<u8>().ok()?;
    let day = parts.next()?.parse::<u8>().ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}
