use time::Date;

/// Tenant used when neither the record nor the session names one.
pub const DEFAULT_TENANT: &str = "default_tenant";

/// Identity and dating of one unit of work (a request, a CLI invocation, a
/// worker task). Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub tenant_name: String,
    pub action_date: Date,
    pub value_date: Date,
    pub user_id: String,
    pub user_name: String,
}

impl SessionContext {
    pub fn new(
        tenant_name: impl Into<String>,
        action_date: Date,
        value_date: Date,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            tenant_name: tenant_name.into(),
            action_date,
            value_date,
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }

    /// Overwrites every field present in `update`, leaving the rest.
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(tenant_name) = update.tenant_name {
            self.tenant_name = tenant_name;
        }
        if let Some(action_date) = update.action_date {
            self.action_date = action_date;
        }
        if let Some(value_date) = update.value_date {
            self.value_date = value_date;
        }
        if let Some(user_id) = update.user_id {
            self.user_id = user_id;
        }
        if let Some(user_name) = update.user_name {
            self.user_name = user_name;
        }
    }
}

/// Partial set of session fields, merged by `SessionContext::apply`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub tenant_name: Option<String>,
    pub action_date: Option<Date>,
    pub value_date: Option<Date>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl SessionUpdate {
    pub fn tenant_name(mut self, tenant_name: impl Into<String>) -> Self {
        self.tenant_name = Some(tenant_name.into());
        self
    }

    pub fn action_date(mut self, action_date: Date) -> Self {
        self.action_date = Some(action_date);
        self
    }

    pub fn value_date(mut self, value_date: Date) -> Self {
        self.value_date = Some(value_date);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }
}

/// Picks the tenant a new record is written under: the record's own tenant,
/// else the session's, else `DEFAULT_TENANT`.
pub fn resolve_tenant(explicit: Option<&str>, session: Option<&SessionContext>) -> String {
    match (explicit, session) {
        (Some(tenant), _) => tenant.to_string(),
        (None, Some(ctx)) => ctx.tenant_name.clone(),
        (None, None) => DEFAULT_TENANT.to_string(),
    }
}
