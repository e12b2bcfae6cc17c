use vault_core::{Subscription, SubscriptionId, TenantId, VaultError};

use crate::db::{deserialize, serialize, subscription_key, tenant_prefix, StateDb};

/// Tenant-scoped registry of outbound webhook subscriptions (C8).
pub struct SubscriptionStore<'a> {
    db: &'a StateDb,
}

impl<'a> SubscriptionStore<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    pub fn put(&self, subscription: &Subscription) -> Result<(), VaultError> {
        let key = subscription_key(&subscription.tenant_id, &subscription.id);
        let bytes = serialize(subscription)?;
        self.db.subscriptions.insert(key, bytes).map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn get(&self, tenant_id: &TenantId, id: &SubscriptionId) -> Result<Option<Subscription>, VaultError> {
        let key = subscription_key(tenant_id, id);
        match self.db.subscriptions.get(key).map_err(|e| VaultError::Storage(e.to_string()))? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Active subscriptions for a tenant, the set C8's dispatcher fans an
    /// event out to.
    pub fn active_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Subscription>, VaultError> {
        let prefix = tenant_prefix(tenant_id);
        let mut out = Vec::new();
        for item in self.db.subscriptions.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(|e| VaultError::Storage(e.to_string()))?;
            let sub: Subscription = deserialize(&bytes)?;
            if sub.active {
                out.push(sub);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn put_then_list_active_only() {
        let (db, _dir) = StateDb::open_temp();
        let store = SubscriptionStore::new(&db);
        let tenant = TenantId::new("tenant-a");
        let active = Subscription {
            id: SubscriptionId::new(),
            tenant_id: tenant.clone(),
            target_url: "https://example.com/hook".into(),
            signing_secret: "secret".into(),
            active: true,
            created_at: Utc::now(),
        };
        let inactive = Subscription { id: SubscriptionId::new(), active: false, ..active.clone() };
        store.put(&active).unwrap();
        store.put(&inactive).unwrap();
        let listed = store.active_for_tenant(&tenant).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);
    }
}
