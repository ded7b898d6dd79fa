//! Typed accessors over the broker's namespaced keys.

use std::collections::{BTreeMap, BTreeSet};

use iambroker_core::{AccountKey, RelationId};
use serde::{Deserialize, Serialize};

use crate::error::StateResult;
use crate::store::StateStore;

/// Cloud project the active credentials belong to.
pub const PROJECT_KEY: &str = "broker.project";

/// Service-account id → email cache.
pub const SERVICE_ACCOUNTS_KEY: &str = "broker.service-accounts";

/// Per-relation issued key records: `broker.account-keys.<relation-id>`.
pub const ACCOUNT_KEYS_PREFIX: &str = "broker.account-keys.";

/// Per-application managed entity sets: `broker.managed.<application>`.
pub const MANAGED_PREFIX: &str = "broker.managed.";

/// Cloud entities the broker created or bound for one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManagedEntities {
    pub service_account: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub custom_roles: BTreeSet<String>,
}

impl StateStore {
    pub fn project(&self) -> StateResult<Option<String>> {
        self.get(PROJECT_KEY)
    }

    pub fn set_project(&self, project: &str) -> StateResult<()> {
        self.set(PROJECT_KEY, project)
    }

    pub fn service_accounts(&self) -> StateResult<BTreeMap<String, String>> {
        self.get_or(SERVICE_ACCOUNTS_KEY, BTreeMap::new())
    }

    pub fn set_service_accounts(&self, accounts: &BTreeMap<String, String>) -> StateResult<()> {
        self.set(SERVICE_ACCOUNTS_KEY, accounts)
    }

    /// Key registry: every relation that currently holds an issued key.
    pub fn account_keys(&self) -> StateResult<BTreeMap<RelationId, AccountKey>> {
        self.get_range(ACCOUNT_KEYS_PREFIX)
    }

    pub fn account_key(&self, relation_id: &str) -> StateResult<Option<AccountKey>> {
        self.get(&format!("{ACCOUNT_KEYS_PREFIX}{relation_id}"))
    }

    pub fn put_account_key(&self, relation_id: &str, key: &AccountKey) -> StateResult<()> {
        self.set(&format!("{ACCOUNT_KEYS_PREFIX}{relation_id}"), key)
    }

    pub fn remove_account_keys<K: AsRef<str>>(&self, relation_ids: &[K]) -> StateResult<u32> {
        self.unset_range(relation_ids, ACCOUNT_KEYS_PREFIX)
    }

    pub fn managed_entities(&self, application: &str) -> StateResult<ManagedEntities> {
        self.get_or(&format!("{MANAGED_PREFIX}{application}"), ManagedEntities::default())
    }

    pub fn put_managed_entities(
        &self,
        application: &str,
        entities: &ManagedEntities,
    ) -> StateResult<()> {
        self.set(&format!("{MANAGED_PREFIX}{application}"), entities)
    }

    pub fn all_managed_entities(&self) -> StateResult<BTreeMap<String, ManagedEntities>> {
        self.get_range(MANAGED_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> AccountKey {
        AccountKey {
            service_account: "sa@proj.iam.gserviceaccount.com".to_string(),
            id: id.to_string(),
            application_name: Some("worker".to_string()),
        }
    }

    #[test]
    fn account_key_registry() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_account_key("gcp:1", &key("K1")).unwrap();
        store.put_account_key("gcp:2", &key("K2")).unwrap();

        let registry = store.account_keys().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry["gcp:2"].id, "K2");

        assert_eq!(store.remove_account_keys(&["gcp:2"]).unwrap(), 1);
        assert!(store.account_key("gcp:2").unwrap().is_none());
        assert_eq!(store.account_key("gcp:1").unwrap(), Some(key("K1")));
    }

    #[test]
    fn service_account_cache_defaults_empty() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.service_accounts().unwrap().is_empty());

        let mut cache = BTreeMap::new();
        cache.insert("juju-gcp-a-123456".to_string(), "a@p".to_string());
        store.set_service_accounts(&cache).unwrap();
        assert_eq!(store.service_accounts().unwrap(), cache);
    }

    #[test]
    fn managed_entities_do_not_leak_into_key_registry() {
        let store = StateStore::open_in_memory().unwrap();
        let mut entities = ManagedEntities::default();
        entities.roles.insert("roles/dns.admin".to_string());
        store.put_managed_entities("worker", &entities).unwrap();
        store.set_project("proj").unwrap();

        assert!(store.account_keys().unwrap().is_empty());
        assert_eq!(store.managed_entities("worker").unwrap(), entities);
        assert_eq!(store.managed_entities("other").unwrap(), ManagedEntities::default());
        assert_eq!(store.all_managed_entities().unwrap().len(), 1);
        assert_eq!(store.project().unwrap().as_deref(), Some("proj"));
    }
}
