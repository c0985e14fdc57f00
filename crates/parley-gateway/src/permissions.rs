use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::info;
use uuid::Uuid;

use parley_types::models::{ChatPermission, Grant, Role};

type RuleKey = (Option<Uuid>, Role, Role);

/// In-memory copy of the chat permission matrix, keyed by
/// `(tenant, from_role, to_role)`. A tenant row overrides the global row for
/// the same pair; a pair with no row at all is denied.
#[derive(Default)]
pub struct PermissionMatrix {
    rules: RwLock<HashMap<RuleKey, Grant>>,
}

impl PermissionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: impl IntoIterator<Item = ChatPermission>) -> Self {
        let matrix = Self::new();
        matrix.replace(rules);
        matrix
    }

    /// Swap in a freshly loaded rule set.
    pub fn replace(&self, rules: impl IntoIterator<Item = ChatPermission>) {
        let table: HashMap<RuleKey, Grant> = rules
            .into_iter()
            .map(|rule| ((rule.tenant_id, rule.from_role, rule.to_role), rule.grant()))
            .collect();
        info!("Permission matrix loaded ({} rules)", table.len());
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    pub fn upsert(&self, rule: &ChatPermission) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((rule.tenant_id, rule.from_role, rule.to_role), rule.grant());
    }

    pub fn check(&self, tenant_id: Uuid, from: Role, to: Role) -> Grant {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules
            .get(&(Some(tenant_id), from, to))
            .or_else(|| rules.get(&(None, from, to)))
            .copied()
            .unwrap_or_default()
    }

    pub fn can_send(&self, tenant_id: Uuid, from: Role, to: Role) -> bool {
        self.check(tenant_id, from, to).can_send
    }
}
