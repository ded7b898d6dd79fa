use iambroker_cloud::CloudError;
use iambroker_core::{FOUNDATION_ROLES, RoleBinding, service_account_name};
use serde_json::Value;
use tracing::{debug, info};

use super::Provisioner;
use crate::error::ReconcileResult;

/// A resolved service account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub email: String,
    /// True when this call created the account (and granted foundation roles).
    pub created: bool,
}

impl Provisioner<'_> {
    /// Find or create the service account for `(model_uuid, application)`.
    ///
    /// Lookup order: the local cache, then a live listing (which refreshes
    /// the cache), then creation. A new account gets the foundation roles.
    pub fn resolve_service_account(
        &self,
        model_uuid: &str,
        application: &str,
    ) -> ReconcileResult<ServiceAccount> {
        let name = service_account_name(model_uuid, application);
        let store = &self.ctx.store;

        let mut cache = store.service_accounts()?;
        if let Some(email) = cache.get(&name) {
            debug!(account = %name, "service account cache hit");
            return Ok(ServiceAccount {
                email: email.clone(),
                created: false,
            });
        }

        let listed = self.cloud.invoke("iam", "service-accounts", &["list"])?;
        let entries = listed.as_array().ok_or_else(|| CloudError::Format {
            command: "iam service-accounts list".to_string(),
            output: listed.to_string(),
        })?;
        for email in entries.iter().filter_map(|sa| sa.get("email").and_then(Value::as_str)) {
            if let Some((id, _)) = email.split_once('@') {
                cache.insert(id.to_string(), email.to_string());
            }
        }
        store.set_service_accounts(&cache)?;

        if let Some(email) = cache.get(&name) {
            debug!(account = %name, "service account found in project");
            return Ok(ServiceAccount {
                email: email.clone(),
                created: false,
            });
        }

        let created = self.cloud.invoke("iam", "service-accounts", &["create", name.as_str()])?;
        let email = created
            .get("email")
            .and_then(Value::as_str)
            .ok_or_else(|| CloudError::Format {
                command: "iam service-accounts create".to_string(),
                output: created.to_string(),
            })?
            .to_string();
        cache.insert(name.clone(), email.clone());
        store.set_service_accounts(&cache)?;
        info!(account = %name, email = %email, application, "created service account");

        self.grant_foundation_roles(&email)?;
        Ok(ServiceAccount {
            email,
            created: true,
        })
    }

    /// Bind the roles every broker-managed account carries.
    pub fn grant_foundation_roles(&self, email: &str) -> ReconcileResult<()> {
        let bindings: Vec<RoleBinding> = FOUNDATION_ROLES
            .iter()
            .map(|role| RoleBinding::unconditional(*role))
            .collect();
        self.bind_all(email, &bindings)
    }
}
