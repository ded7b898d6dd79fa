use std::fs;
use std::sync::LazyLock;

use iambroker_cloud::CloudError;
use iambroker_core::{AccountKey, CapabilityRequest};
use regex::Regex;
use tracing::{debug, info, warn};

use super::Provisioner;
use crate::error::ReconcileResult;

/// The key id only appears in the human-readable confirmation on stderr.
static KEY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"created key \[([^\]]*)\]").expect("valid key id pattern"));

/// Pull the key id out of `keys create` output.
pub fn extract_key_id(stderr: &str) -> Option<&str> {
    KEY_ID_RE
        .captures(stderr)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|id| !id.is_empty())
}

impl Provisioner<'_> {
    /// Issue a fresh key for the request's relation and return its material.
    ///
    /// A relation holds at most one key: one already on record is revoked
    /// first. The material passes through a private scratch directory that
    /// is removed before returning, whatever the outcome.
    pub fn issue_key(&self, request: &CapabilityRequest, email: &str) -> ReconcileResult<String> {
        let store = &self.ctx.store;
        let relation_id = request.relation_id.as_str();

        if let Some(previous) = store.account_key(relation_id)? {
            warn!(
                relation = relation_id,
                key = %previous.id,
                "relation already holds a key, revoking it"
            );
            self.delete_key(&previous)?;
            store.remove_account_keys(&[relation_id])?;
        }

        let scratch = tempfile::Builder::new().prefix("iambroker-key-").tempdir()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(scratch.path(), fs::Permissions::from_mode(0o700))?;
        }
        let key_path = scratch.path().join("creds.json");
        let key_arg = key_path.to_string_lossy().into_owned();

        let stderr = self.retry.run("create service account key", || {
            self.cloud.invoke_stderr(
                "iam",
                "service-accounts",
                &["keys", "create", "--iam-account", email, key_arg.as_str()],
            )
        })?;
        let key_id = extract_key_id(&stderr)
            .ok_or_else(|| CloudError::Format {
                command: "iam service-accounts keys create".to_string(),
                output: stderr.clone(),
            })?
            .to_string();

        // Recorded before the material is read so a live key is always revocable.
        store.put_account_key(
            relation_id,
            &AccountKey {
                service_account: email.to_string(),
                id: key_id.clone(),
                application_name: Some(request.application_name.clone()),
            },
        )?;

        let material = fs::read_to_string(&key_path)?;
        scratch.close()?;
        info!(
            relation = relation_id,
            unit = %request.unit_name,
            key = %key_id,
            "issued service account key"
        );
        Ok(material)
    }

    /// Revoke a key. A key that no longer exists counts as revoked.
    pub fn delete_key(&self, key: &AccountKey) -> ReconcileResult<()> {
        let result = self.cloud.invoke(
            "iam",
            "service-accounts",
            &[
                "keys",
                "delete",
                key.id.as_str(),
                "--iam-account",
                key.service_account.as_str(),
            ],
        );
        match result {
            Ok(_) => {
                info!(key = %key.id, account = %key.service_account, "deleted service account key");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(key = %key.id, "key already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use iambroker_cloud::fake::FakeCloud;
    use iambroker_cloud::{CloudIam, CloudResult};
    use iambroker_core::CapabilityFlags;
    use serde_json::Value;

    use super::super::test_support::{MODEL, context, no_wait};
    use super::*;
    use crate::error::ReconcileError;

    fn request(relation_id: &str) -> CapabilityRequest {
        CapabilityRequest {
            relation_id: relation_id.into(),
            unit_name: "kubernetes-worker/0".into(),
            application_name: "kubernetes-worker".into(),
            model_uuid: MODEL.into(),
            instance: "vm-0".into(),
            zone: "us-east1-b".into(),
            instance_labels: BTreeMap::new(),
            capabilities: CapabilityFlags::default(),
            object_storage_read_patterns: Vec::new(),
            object_storage_write_patterns: Vec::new(),
            has_credentials: false,
        }
    }

    #[test]
    fn extracts_key_id_from_confirmation() {
        let stderr = "created key [3f2a9c] of type [json] as [/tmp/x/creds.json] for [sa@p.iam]";
        assert_eq!(extract_key_id(stderr), Some("3f2a9c"));
        assert_eq!(extract_key_id("something else entirely"), None);
        assert_eq!(extract_key_id("created key [] of type [json]"), None);
    }

    #[test]
    fn issues_key_and_records_it() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        let email = cloud.add_service_account("sa");
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        let material = p.issue_key(&request("gcp:1"), &email).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&material).unwrap();
        assert_eq!(parsed["client_email"], email.as_str());
        let record = ctx.store.account_key("gcp:1").unwrap().unwrap();
        assert_eq!(record.service_account, email);
        assert_eq!(record.application_name.as_deref(), Some("kubernetes-worker"));
        assert!(cloud.key_ids().contains(&record.id));
    }

    #[test]
    fn reissue_revokes_previous_key() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        let email = cloud.add_service_account("sa");
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        p.issue_key(&request("gcp:1"), &email).unwrap();
        let first = ctx.store.account_key("gcp:1").unwrap().unwrap();
        p.issue_key(&request("gcp:1"), &email).unwrap();
        let second = ctx.store.account_key("gcp:1").unwrap().unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(cloud.key_ids().len(), 1);
        assert!(cloud.key_ids().contains(&second.id));
        assert_eq!(ctx.store.account_keys().unwrap().len(), 1);
    }

    #[test]
    fn unparseable_confirmation_is_fatal() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        let email = cloud.add_service_account("sa");
        cloud.override_key_stderr("WARNING: something unexpected happened");
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        let err = p.issue_key(&request("gcp:1"), &email).unwrap_err();
        assert!(matches!(err, ReconcileError::Cloud(CloudError::Format { .. })));
        assert!(ctx.store.account_key("gcp:1").unwrap().is_none());
    }

    #[test]
    fn key_creation_retries_until_account_visible() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        let email = cloud.add_service_account("sa");
        cloud.fail_next(
            "iam service-accounts keys create",
            "ERROR: (gcloud.iam.service-accounts.keys.create) NOT_FOUND: sa",
            3,
        );
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        p.issue_key(&request("gcp:1"), &email).unwrap();
        assert_eq!(cloud.count_calls("iam service-accounts keys create"), 4);
    }

    /// Loses the key file the CLI just wrote.
    struct LosesKeyFile<'a> {
        inner: &'a FakeCloud,
    }

    impl CloudIam for LosesKeyFile<'_> {
        fn invoke(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<Value> {
            self.inner.invoke(group, subgroup, args)
        }

        fn invoke_stderr(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<String> {
            let stderr = self.inner.invoke_stderr(group, subgroup, args)?;
            if let Some(path) = args.last() {
                fs::remove_file(path).unwrap();
            }
            Ok(stderr)
        }
    }

    #[test]
    fn created_key_is_recorded_even_if_material_is_lost() {
        let ctx = context();
        let fake = FakeCloud::new("proj");
        let email = fake.add_service_account("sa");
        let cloud = LosesKeyFile { inner: &fake };
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        let err = p.issue_key(&request("gcp:1"), &email).unwrap_err();
        assert!(matches!(err, ReconcileError::Io(_)));

        let record = ctx.store.account_key("gcp:1").unwrap().unwrap();
        assert!(fake.key_ids().contains(&record.id));
        assert_eq!(record.service_account, email);
    }

    #[test]
    fn deleting_missing_key_is_success() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        let key = AccountKey {
            service_account: "sa@proj.iam.gserviceaccount.com".into(),
            id: "gone".into(),
            application_name: None,
        };
        p.delete_key(&key).unwrap();
        assert_eq!(cloud.count_calls("iam service-accounts keys delete gone"), 1);
    }
}
