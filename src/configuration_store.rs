use std::sync::Arc;

use tenantledger_core::{resolve_tenant, Configuration, NewConfiguration, SessionContext};

use crate::session;
use crate::storage::{in_transaction, StorageBackend, StorageError};

/// Versioned configuration snapshots. Every save appends a new version; stored
/// versions are never changed.
pub struct ConfigurationStore {
    storage: Arc<dyn StorageBackend>,
}

impl ConfigurationStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Every stored version across all tenants, ordered by tenant, name, version.
    pub fn get_all(&self) -> Result<Vec<Configuration>, StorageError> {
        in_transaction(self.storage.as_ref(), |tx| tx.list_configurations())
    }

    /// Highest version with this name in any tenant. Equal versions in two
    /// tenants resolve to the tenant that sorts first.
    pub fn get_latest_by_name(&self, name: &str) -> Result<Option<Configuration>, StorageError> {
        in_transaction(self.storage.as_ref(), |tx| tx.latest_configuration(name, None))
    }

    pub fn get_latest_for_tenant(&self, name: &str, tenant_name: &str) -> Result<Option<Configuration>, StorageError> {
        in_transaction(self.storage.as_ref(), |tx| tx.latest_configuration(name, Some(tenant_name)))
    }

    /// Stores `configuration` as version (latest for its tenant and name) + 1,
    /// or 1 if there is none. The tenant comes from the record, else the
    /// session, else the default tenant.
    ///
    /// Two concurrent saves of the same name and tenant never get the same
    /// version: the loser fails with `StorageError::VersionConflict` and may
    /// be retried.
    pub fn save(
        &self,
        configuration: NewConfiguration,
        session: Option<&SessionContext>,
    ) -> Result<Configuration, StorageError> {
        let tenant_name = resolve_tenant(configuration.tenant_name.as_deref(), session);

        let saved = in_transaction(self.storage.as_ref(), |tx| {
            let version = match tx.latest_configuration(&configuration.name, Some(&tenant_name))? {
                Some(latest) => latest.version.checked_add(1).ok_or_else(|| {
                    StorageError::Other(format!("configuration '{}' has no versions left", latest.name))
                })?,
                None => 1,
            };
            let record = configuration.into_version(tenant_name.clone(), version);
            tx.insert_configuration(&record)?;
            Ok(record)
        });

        match &saved {
            Ok(record) => tracing::info!(
                name = %record.name,
                tenant = %record.tenant_name,
                version = record.version,
                "Configuration saved"
            ),
            Err(e) if e.is_retryable() => tracing::warn!(tenant = %tenant_name, error = %e, "Configuration save lost a race"),
            Err(_) => {}
        }
        saved
    }

    /// `save` with the calling thread's ambient session.
    pub fn save_in_current_session(&self, configuration: NewConfiguration) -> Result<Configuration, StorageError> {
        let context = session::get();
        self.save(configuration, context.as_ref())
    }
}
