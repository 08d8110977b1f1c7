use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

use super::{empty_info, AccountData, AccountType, AdditionalInfo, Configuration, TransactionData};
use crate::session::SessionContext;

/// A configuration snapshot to be stored as the next version of its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConfiguration {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub account_types: Vec<AccountType>,
    #[serde(default)]
    pub tenant_name: Option<String>,
}

impl NewConfiguration {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            account_types: Vec::new(),
            tenant_name: None,
        }
    }

    pub fn with_tenant(mut self, tenant_name: impl Into<String>) -> Self {
        self.tenant_name = Some(tenant_name.into());
        self
    }

    pub fn with_account_types(mut self, account_types: Vec<AccountType>) -> Self {
        self.account_types = account_types;
        self
    }

    pub fn into_version(self, tenant_name: String, version: u32) -> Configuration {
        Configuration {
            name: self.name,
            label: self.label,
            version,
            account_types: self.account_types,
            tenant_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub account_number: String,
    pub account_type: String,
    pub configuration_name: String,
    pub configuration_version: u32,
    #[serde(default)]
    pub tenant_name: Option<String>,
    #[serde(default = "empty_info")]
    pub additional_info: AdditionalInfo,
}

impl NewAccount {
    pub fn new(
        account_number: impl Into<String>,
        account_type: impl Into<String>,
        configuration_name: impl Into<String>,
        configuration_version: u32,
    ) -> Self {
        Self {
            account_number: account_number.into(),
            account_type: account_type.into(),
            configuration_name: configuration_name.into(),
            configuration_version,
            tenant_name: None,
            additional_info: empty_info(),
        }
    }

    pub fn with_tenant(mut self, tenant_name: impl Into<String>) -> Self {
        self.tenant_name = Some(tenant_name.into());
        self
    }

    pub fn with_info(mut self, additional_info: AdditionalInfo) -> Self {
        self.additional_info = additional_info;
        self
    }

    pub fn into_account(self, tenant_name: String) -> AccountData {
        AccountData {
            account_number: self.account_number,
            account_type: self.account_type,
            configuration_name: self.configuration_name,
            configuration_version: self.configuration_version,
            tenant_name,
            additional_info: self.additional_info,
        }
    }
}

/// A ledger movement before it is given its id and appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub account_number: String,
    pub amount: Decimal,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub action_date: Option<Date>,
    #[serde(default)]
    pub value_date: Option<Date>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub system_generated: bool,
    #[serde(default = "empty_info")]
    pub additional_info: AdditionalInfo,
}

impl NewTransaction {
    pub fn new(account_number: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_number: account_number.into(),
            amount,
            transaction_id: None,
            action_date: None,
            value_date: None,
            transaction_type: None,
            payment_id: None,
            system_generated: false,
            additional_info: empty_info(),
        }
    }

    pub fn with_type(mut self, transaction_type: impl Into<String>) -> Self {
        self.transaction_type = Some(transaction_type.into());
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_payment_id(mut self, payment_id: impl Into<String>) -> Self {
        self.payment_id = Some(payment_id.into());
        self
    }

    pub fn with_dates(mut self, action_date: Date, value_date: Date) -> Self {
        self.action_date = Some(action_date);
        self.value_date = Some(value_date);
        self
    }

    pub fn with_info(mut self, additional_info: AdditionalInfo) -> Self {
        self.additional_info = additional_info;
        self
    }

    pub fn system_generated(mut self) -> Self {
        self.system_generated = true;
        self
    }

    /// Assigns `id` and fills any missing date from the session.
    pub fn into_record(self, id: Uuid, session: Option<&SessionContext>) -> TransactionData {
        TransactionData {
            id,
            account_number: self.account_number,
            transaction_id: self.transaction_id,
            amount: self.amount,
            action_date: self.action_date.or(session.map(|s| s.action_date)),
            value_date: self.value_date.or(session.map(|s| s.value_date)),
            transaction_type: self.transaction_type,
            payment_id: self.payment_id,
            system_generated: self.system_generated,
            additional_info: self.additional_info,
        }
    }
}
