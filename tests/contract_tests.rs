//! Behaviour every storage backend must share, run against each of them.
//!
//! The Postgres suite runs only when `TENANTLEDGER_PG_URL` points at a
//! database. Names, tenants and account numbers are made unique per test so
//! runs can share one database.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use rust_decimal_macros::dec;
use serde_json::json;
use tenantledger::storage::{in_transaction, InMemoryStorage, PostgresStorage, SqliteStorage, StorageBackend, StorageError};
use tenantledger::{
    AccountLedgerStore, AccountType, ConfigurationStore, NewAccount, NewConfiguration, NewTransaction, PositionData,
    SessionContext, DEFAULT_TENANT,
};
use time::{Date, Month};
use uuid::Uuid;

fn open_memory() -> Option<Arc<dyn StorageBackend>> {
    Some(Arc::new(InMemoryStorage::new()))
}

fn open_sqlite() -> Option<Arc<dyn StorageBackend>> {
    Some(Arc::new(SqliteStorage::new(":memory:").unwrap()))
}

// One shared connection: concurrent CREATE TABLE IF NOT EXISTS can collide.
fn open_postgres() -> Option<Arc<dyn StorageBackend>> {
    static SHARED: OnceLock<Option<Arc<dyn StorageBackend>>> = OnceLock::new();
    SHARED
        .get_or_init(|| {
            let url = std::env::var("TENANTLEDGER_PG_URL").ok()?;
            let storage: Arc<dyn StorageBackend> = Arc::new(PostgresStorage::new(&url).unwrap());
            Some(storage)
        })
        .clone()
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

fn day(month: Month, d: u8) -> Date {
    Date::from_calendar_date(2025, month, d).unwrap()
}

fn session(tenant: &str) -> SessionContext {
    SessionContext::new(tenant, day(Month::March, 1), day(Month::March, 2), "u1", "User One")
}

// --- configurations ---

fn first_save_is_version_one(storage: Arc<dyn StorageBackend>) {
    let store = ConfigurationStore::new(storage);
    let tenant = unique("tenant");
    let saved = store
        .save(NewConfiguration::new(unique("rules"), "Rules"), Some(&session(&tenant)))
        .unwrap();
    assert_eq!(saved.version, 1);
    assert_eq!(saved.tenant_name, tenant);
}

fn versions_increment_per_tenant(storage: Arc<dyn StorageBackend>) {
    let store = ConfigurationStore::new(storage);
    let name = unique("rules");
    let (acme, globex) = (unique("acme"), unique("globex"));

    for expected in 1..=3 {
        let saved = store.save(NewConfiguration::new(name.as_str(), "Rules"), Some(&session(&acme))).unwrap();
        assert_eq!(saved.version, expected);
    }
    let other = store.save(NewConfiguration::new(name.as_str(), "Rules"), Some(&session(&globex))).unwrap();
    assert_eq!(other.version, 1);

    assert_eq!(store.get_latest_for_tenant(&name, &acme).unwrap().unwrap().version, 3);
    assert_eq!(store.get_latest_for_tenant(&name, &globex).unwrap().unwrap().version, 1);
}

fn unscoped_latest_spans_tenants(storage: Arc<dyn StorageBackend>) {
    let store = ConfigurationStore::new(storage);
    let name = unique("rules");
    let (low, high) = (unique("a-tenant"), unique("b-tenant"));

    store.save(NewConfiguration::new(name.as_str(), "v1").with_tenant(low.as_str()), None).unwrap();
    store.save(NewConfiguration::new(name.as_str(), "v1").with_tenant(high.as_str()), None).unwrap();
    store.save(NewConfiguration::new(name.as_str(), "v2").with_tenant(high.as_str()), None).unwrap();

    let latest = store.get_latest_by_name(&name).unwrap().unwrap();
    assert_eq!(latest.tenant_name, high);
    assert_eq!(latest.version, 2);

    // equal versions resolve to the tenant that sorts first
    store.save(NewConfiguration::new(name.as_str(), "v2").with_tenant(low.as_str()), None).unwrap();
    let latest = store.get_latest_by_name(&name).unwrap().unwrap();
    assert_eq!(latest.tenant_name, low);
}

fn latest_of_unknown_name_is_none(storage: Arc<dyn StorageBackend>) {
    let store = ConfigurationStore::new(storage);
    assert!(store.get_latest_by_name(&unique("missing")).unwrap().is_none());
    assert!(store.get_latest_for_tenant(&unique("missing"), DEFAULT_TENANT).unwrap().is_none());
}

fn get_all_returns_every_version_in_order(storage: Arc<dyn StorageBackend>) {
    let store = ConfigurationStore::new(storage);
    let tenant = unique("tenant");
    let (first, second) = (format!("{}-a", tenant), format!("{}-b", tenant));
    let types = vec![AccountType::new("savings", "Savings")];

    store
        .save(NewConfiguration::new(second.as_str(), "B").with_tenant(tenant.as_str()), None)
        .unwrap();
    store
        .save(
            NewConfiguration::new(first.as_str(), "A")
                .with_tenant(tenant.as_str())
                .with_account_types(types.clone()),
            None,
        )
        .unwrap();
    store
        .save(NewConfiguration::new(first.as_str(), "A2").with_tenant(tenant.as_str()), None)
        .unwrap();

    let mine: Vec<(String, u32)> = store
        .get_all()
        .unwrap()
        .into_iter()
        .filter(|c| c.tenant_name == tenant)
        .map(|c| (c.name, c.version))
        .collect();
    assert_eq!(mine, vec![(first.clone(), 1), (first.clone(), 2), (second, 1)]);

    // old versions are kept as written
    let v1 = store
        .get_all()
        .unwrap()
        .into_iter()
        .find(|c| c.name == first && c.version == 1)
        .unwrap();
    assert_eq!(v1.label, "A");
    assert_eq!(v1.account_types, types);
}

fn concurrent_saves_never_share_a_version(storage: Arc<dyn StorageBackend>) {
    let store = ConfigurationStore::new(storage);
    let name = unique("rules");
    let tenant = unique("tenant");
    let writers = 4;
    let saves_each = 5;

    let versions: Vec<u32> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..writers)
            .map(|_| {
                let (store, name, tenant) = (&store, &name, &tenant);
                scope.spawn(move || {
                    let mut mine = Vec::new();
                    for _ in 0..saves_each {
                        loop {
                            let attempt = NewConfiguration::new(name.as_str(), "Rules").with_tenant(tenant.as_str());
                            match store.save(attempt, None) {
                                Ok(saved) => {
                                    mine.push(saved.version);
                                    break;
                                }
                                Err(e) if e.is_retryable() => continue,
                                Err(e) => panic!("save failed: {}", e),
                            }
                        }
                    }
                    mine
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let distinct: BTreeSet<u32> = versions.iter().copied().collect();
    assert_eq!(distinct.len(), versions.len());
    assert_eq!(distinct, (1..=(writers * saves_each) as u32).collect());
}

// --- accounts ---

fn account_round_trip(storage: Arc<dyn StorageBackend>) {
    let store = AccountLedgerStore::new(storage);
    let number = unique("acct");
    let info = json!({"owner": {"name": "Ann", "tags": ["vip", 3]}});

    let created = store
        .create_account(
            NewAccount::new(number.as_str(), "savings", "rules", 2).with_info(info.clone()),
            vec![
                PositionData::new(number.as_str(), "principal", dec!(1234.5678)),
                PositionData::new(number.as_str(), "interest", dec!(0.0001)).with_info(json!({"rate": "1.5%"})),
            ],
            vec![NewTransaction::new(number.as_str(), dec!(1234.5678))
                .with_type("disbursement")
                .with_transaction_id("ext-1")
                .with_payment_id("pay-1")
                .with_info(json!({"channel": "branch"}))
                .system_generated()],
            Some(&session("acme")),
        )
        .unwrap();
    assert_eq!(created.tenant_name, "acme");

    let view = store.get_account_data(&number).unwrap();
    let account = view.account.clone().unwrap();
    assert_eq!(account, created);
    assert_eq!(account.additional_info, info);
    assert_eq!(account.configuration_version, 2);

    // positions come back ordered by type
    let types: Vec<&str> = view.positions.iter().map(|p| p.position_type.as_str()).collect();
    assert_eq!(types, vec!["interest", "principal"]);
    assert_eq!(view.position("principal").unwrap().amount, dec!(1234.5678));
    assert_eq!(view.position("interest").unwrap().additional_info, json!({"rate": "1.5%"}));

    let txn = &view.transactions[0];
    assert_eq!(txn.amount, dec!(1234.5678));
    assert_eq!(txn.transaction_id.as_deref(), Some("ext-1"));
    assert_eq!(txn.payment_id.as_deref(), Some("pay-1"));
    assert!(txn.system_generated);
    assert_eq!(txn.additional_info, json!({"channel": "branch"}));
}

fn account_tenant_resolution(storage: Arc<dyn StorageBackend>) {
    let store = AccountLedgerStore::new(storage);
    let (a, b, c) = (unique("acct"), unique("acct"), unique("acct"));

    let explicit = store
        .create_account(NewAccount::new(a.as_str(), "savings", "rules", 1).with_tenant("mine"), Vec::new(), Vec::new(), Some(&session("acme")))
        .unwrap();
    let from_session = store
        .create_account(NewAccount::new(b.as_str(), "savings", "rules", 1), Vec::new(), Vec::new(), Some(&session("acme")))
        .unwrap();
    let fallback = store
        .create_account(NewAccount::new(c.as_str(), "savings", "rules", 1), Vec::new(), Vec::new(), None)
        .unwrap();

    assert_eq!(explicit.tenant_name, "mine");
    assert_eq!(from_session.tenant_name, "acme");
    assert_eq!(fallback.tenant_name, DEFAULT_TENANT);
}

fn duplicate_account_writes_nothing(storage: Arc<dyn StorageBackend>) {
    let store = AccountLedgerStore::new(storage);
    let number = unique("acct");
    store
        .create_account(
            NewAccount::new(number.as_str(), "savings", "rules", 1),
            vec![PositionData::new(number.as_str(), "principal", dec!(10))],
            Vec::new(),
            None,
        )
        .unwrap();

    let err = store
        .create_account(
            NewAccount::new(number.as_str(), "loan", "rules", 1),
            vec![
                PositionData::new(number.as_str(), "principal", dec!(99)),
                PositionData::new(number.as_str(), "fees", dec!(5)),
            ],
            vec![NewTransaction::new(number.as_str(), dec!(99))],
            None,
        )
        .unwrap_err();
    match err {
        StorageError::DuplicateAccount(n) => assert_eq!(n, number),
        other => panic!("Expected DuplicateAccount, got {:?}", other),
    }

    let view = store.get_account_data(&number).unwrap();
    assert_eq!(view.account.as_ref().unwrap().account_type, "savings");
    assert_eq!(view.positions.len(), 1);
    assert_eq!(view.position("principal").unwrap().amount, dec!(10));
    assert!(view.transactions.is_empty());
}

fn additional_info_is_replaced(storage: Arc<dyn StorageBackend>) {
    let store = AccountLedgerStore::new(storage);
    let number = unique("acct");
    store
        .create_account(
            NewAccount::new(number.as_str(), "savings", "rules", 1).with_info(json!({"a": 1, "b": 2})),
            Vec::new(),
            Vec::new(),
            None,
        )
        .unwrap();

    assert!(store.update_account_additional_info(&number, json!({"c": [1, 2]})).unwrap());
    let account = store.get_account_data(&number).unwrap().account.unwrap();
    assert_eq!(account.additional_info, json!({"c": [1, 2]}));

    assert!(!store.update_account_additional_info(&unique("ghost"), json!({})).unwrap());
}

fn reconcile_upserts_positions_and_appends(storage: Arc<dyn StorageBackend>) {
    let store = AccountLedgerStore::new(storage);
    let number = unique("acct");
    store
        .create_account(
            NewAccount::new(number.as_str(), "savings", "rules", 1),
            vec![PositionData::new(number.as_str(), "principal", dec!(100))],
            vec![NewTransaction::new(number.as_str(), dec!(100)).with_type("open")],
            None,
        )
        .unwrap();

    let outcome = store
        .create_transactions(
            vec![
                PositionData::new(number.as_str(), "principal", dec!(75.25)),
                PositionData::new(number.as_str(), "fees", dec!(1.5)),
            ],
            vec![
                NewTransaction::new(number.as_str(), dec!(-24.75)).with_type("repay"),
                NewTransaction::new(number.as_str(), dec!(1.5)).with_type("fee"),
            ],
            None,
        )
        .unwrap();
    assert_eq!(outcome.inserted_positions, 1);
    assert_eq!(outcome.updated_positions, 1);
    assert_eq!(outcome.transactions.len(), 2);

    let view = store.get_account_data(&number).unwrap();
    assert_eq!(view.positions.len(), 2);
    assert_eq!(view.position("principal").unwrap().amount, dec!(75.25));

    let kinds: Vec<&str> = view.transactions.iter().filter_map(|t| t.transaction_type.as_deref()).collect();
    assert_eq!(kinds, vec!["open", "repay", "fee"]);
    let ids: Vec<Uuid> = view.transactions[1..].iter().map(|t| t.id).collect();
    let returned: Vec<Uuid> = outcome.transactions.iter().map(|t| t.id).collect();
    assert_eq!(ids, returned);
}

fn failed_unit_of_work_writes_nothing(storage: Arc<dyn StorageBackend>) {
    let number = unique("acct");
    let result: Result<(), StorageError> = in_transaction(storage.as_ref(), |tx| {
        tx.upsert_position(&PositionData::new(number.as_str(), "principal", dec!(1)))?;
        Err(StorageError::Other("aborted".to_string()))
    });
    assert!(result.is_err());

    let view = AccountLedgerStore::new(storage).get_account_data(&number).unwrap();
    assert!(view.positions.is_empty());
}

fn missing_dates_come_from_session(storage: Arc<dyn StorageBackend>) {
    let store = AccountLedgerStore::new(storage);
    let number = unique("acct");
    let own = day(Month::July, 4);
    store
        .create_account(NewAccount::new(number.as_str(), "savings", "rules", 1), Vec::new(), Vec::new(), None)
        .unwrap();

    store
        .create_transactions(
            Vec::new(),
            vec![
                NewTransaction::new(number.as_str(), dec!(1)),
                NewTransaction::new(number.as_str(), dec!(2)).with_dates(own, own),
            ],
            Some(&session("acme")),
        )
        .unwrap();
    store
        .create_transactions(Vec::new(), vec![NewTransaction::new(number.as_str(), dec!(3))], None)
        .unwrap();

    let txns = store.get_account_data(&number).unwrap().transactions;
    assert_eq!(txns[0].action_date, Some(day(Month::March, 1)));
    assert_eq!(txns[0].value_date, Some(day(Month::March, 2)));
    assert_eq!(txns[1].action_date, Some(own));
    assert_eq!(txns[2].action_date, None);
}

fn unknown_account_is_an_empty_view(storage: Arc<dyn StorageBackend>) {
    let view = AccountLedgerStore::new(storage).get_account_data(&unique("ghost")).unwrap();
    assert!(!view.exists());
    assert!(view.positions.is_empty());
    assert!(view.transactions.is_empty());
}

fn scenario_rules_versions(storage: Arc<dyn StorageBackend>) {
    let store = ConfigurationStore::new(storage);
    let rules = unique("rules");
    let (acme, other) = (unique("acme"), unique("other"));

    assert_eq!(store.save(NewConfiguration::new(rules.as_str(), "Rules"), Some(&session(&acme))).unwrap().version, 1);
    assert_eq!(store.save(NewConfiguration::new(rules.as_str(), "Rules"), Some(&session(&acme))).unwrap().version, 2);
    assert_eq!(store.get_latest_by_name(&rules).unwrap().unwrap().version, 2);
    assert_eq!(store.save(NewConfiguration::new(rules.as_str(), "Rules"), Some(&session(&other))).unwrap().version, 1);
}

fn scenario_reconcile_twice(storage: Arc<dyn StorageBackend>) {
    let store = AccountLedgerStore::new(storage);
    let number = unique("A1");
    store
        .create_account(NewAccount::new(number.as_str(), "savings", "rules", 1), Vec::new(), Vec::new(), None)
        .unwrap();

    store
        .create_transactions(
            vec![PositionData::new(number.as_str(), "checking", dec!(100))],
            vec![NewTransaction::new(number.as_str(), dec!(100))],
            None,
        )
        .unwrap();
    store
        .create_transactions(
            vec![PositionData::new(number.as_str(), "checking", dec!(150))],
            vec![NewTransaction::new(number.as_str(), dec!(50))],
            None,
        )
        .unwrap();

    let view = store.get_account_data(&number).unwrap();
    assert_eq!(view.positions.len(), 1);
    assert_eq!(view.position("checking").unwrap().amount, dec!(150));
    let amounts: Vec<_> = view.transactions.iter().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![dec!(100), dec!(50)]);
}

fn orphan_rows_do_not_make_an_account(storage: Arc<dyn StorageBackend>) {
    let store = AccountLedgerStore::new(storage);
    let ghost = unique("ghost");
    store
        .create_transactions(
            vec![PositionData::new(ghost.as_str(), "checking", dec!(5))],
            vec![NewTransaction::new(ghost.as_str(), dec!(5))],
            None,
        )
        .unwrap();

    let view = store.get_account_data(&ghost).unwrap();
    assert!(!view.exists());
    assert!(view.positions.is_empty());
    assert!(view.transactions.is_empty());
}

fn create_account_rejects_another_accounts_rows(storage: Arc<dyn StorageBackend>) {
    let store = AccountLedgerStore::new(storage);
    let (a1, a2) = (unique("A1"), unique("A2"));
    store
        .create_account(
            NewAccount::new(a1.as_str(), "savings", "rules", 1),
            vec![PositionData::new(a1.as_str(), "checking", dec!(100))],
            Vec::new(),
            None,
        )
        .unwrap();

    let err = store
        .create_account(
            NewAccount::new(a2.as_str(), "savings", "rules", 1),
            vec![PositionData::new(a1.as_str(), "checking", dec!(0))],
            Vec::new(),
            None,
        )
        .unwrap_err();
    match err {
        StorageError::AccountMismatch { account_number, found } => {
            assert_eq!(account_number, a2);
            assert_eq!(found, a1);
        }
        other => panic!("Expected AccountMismatch, got {:?}", other),
    }

    let err = store
        .create_account(
            NewAccount::new(a2.as_str(), "savings", "rules", 1),
            Vec::new(),
            vec![NewTransaction::new(a1.as_str(), dec!(1))],
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StorageError::AccountMismatch { .. }));

    assert_eq!(store.get_account_data(&a1).unwrap().position("checking").unwrap().amount, dec!(100));
    assert!(store.get_account_data(&a1).unwrap().transactions.is_empty());
    assert!(!store.get_account_data(&a2).unwrap().exists());
}

macro_rules! storage_contract {
    ($backend:ident => $open:expr; $($case:ident),* $(,)?) => {
        paste::paste! {
            $(
                #[test]
                fn [<test_ $backend _ $case>]() {
                    match $open {
                        Some(storage) => $case(storage),
                        None => eprintln!("skipping {} on {}: backend not configured", stringify!($case), stringify!($backend)),
                    }
                }
            )*
        }
    };
}

macro_rules! all_backends {
    ($($case:ident),* $(,)?) => {
        storage_contract!(memory => open_memory(); $($case),*);
        storage_contract!(sqlite => open_sqlite(); $($case),*);
        storage_contract!(postgres => open_postgres(); $($case),*);
    };
}

all_backends!(
    first_save_is_version_one,
    versions_increment_per_tenant,
    unscoped_latest_spans_tenants,
    latest_of_unknown_name_is_none,
    get_all_returns_every_version_in_order,
    concurrent_saves_never_share_a_version,
    account_round_trip,
    account_tenant_resolution,
    duplicate_account_writes_nothing,
    additional_info_is_replaced,
    reconcile_upserts_positions_and_appends,
    failed_unit_of_work_writes_nothing,
    missing_dates_come_from_session,
    unknown_account_is_an_empty_view,
    scenario_rules_versions,
    scenario_reconcile_twice,
    orphan_rows_do_not_make_an_account,
    create_account_rejects_another_accounts_rows,
);
