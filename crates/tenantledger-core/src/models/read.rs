use std::fmt::Display;

use prettytable::{row, Table};
use serde::Serialize;

use super::{format_date, AccountData, PositionData, TransactionData};

/// Composite view of one account. `account` is `None` when the account
/// number is unknown; positions and transactions are then empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AccountView {
    pub account: Option<AccountData>,
    pub positions: Vec<PositionData>,
    pub transactions: Vec<TransactionData>,
}

impl AccountView {
    pub fn exists(&self) -> bool {
        self.account.is_some()
    }

    pub fn position(&self, position_type: &str) -> Option<&PositionData> {
        self.positions.iter().find(|p| p.position_type == position_type)
    }
}

impl Display for AccountView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.account {
            Some(account) => writeln!(
                f,
                "Account {} ({}) tenant={} configuration={}@v{}",
                account.account_number,
                account.account_type,
                account.tenant_name,
                account.configuration_name,
                account.configuration_version
            )?,
            None => writeln!(f, "Account not found")?,
        }

        let mut positions = Table::new();
        positions.add_row(row!["Position", "Amount"]);
        positions.add_empty_row();
        for p in &self.positions {
            positions.add_row(row![p.position_type, p.amount]);
        }
        writeln!(f, "\n{}", positions)?;

        let mut transactions = Table::new();
        transactions.add_row(row!["Id", "Type", "Amount", "Action date", "Value date"]);
        transactions.add_empty_row();
        for t in &self.transactions {
            transactions.add_row(row![
                t.id,
                t.transaction_type.as_deref().unwrap_or(""),
                t.amount,
                t.action_date.map(format_date).unwrap_or_default(),
                t.value_date.map(format_date).unwrap_or_default()
            ]);
        }
        write!(f, "\n{}", transactions)
    }
}
