use std::collections::BTreeMap;

use iambroker_cloud::CloudError;
use serde_json::Value;
use tracing::{debug, info};

use super::Provisioner;
use crate::error::{ReconcileError, ReconcileResult};

/// Labels on an instance together with the fingerprint guarding them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSnapshot {
    pub labels: BTreeMap<String, String>,
    pub fingerprint: String,
}

impl LabelSnapshot {
    fn from_described(described: &Value) -> Result<Self, CloudError> {
        let format_error = || CloudError::Format {
            command: "compute instances describe".to_string(),
            output: described.to_string(),
        };
        let object = described.as_object().ok_or_else(format_error)?;

        let mut labels = BTreeMap::new();
        if let Some(raw) = object.get("labels").filter(|v| !v.is_null()) {
            for (key, value) in raw.as_object().ok_or_else(format_error)? {
                let value = value.as_str().ok_or_else(format_error)?;
                labels.insert(key.clone(), value.to_string());
            }
        }
        let fingerprint = object
            .get("labelFingerprint")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            labels,
            fingerprint,
        })
    }
}

impl Provisioner<'_> {
    pub fn describe_labels(&self, instance: &str, zone: &str) -> ReconcileResult<LabelSnapshot> {
        let described = self
            .cloud
            .invoke("compute", "instances", &["describe", instance, "--zone", zone])?;
        Ok(LabelSnapshot::from_described(&described)?)
    }

    /// Merge `requested` into the instance's labels.
    ///
    /// Requested values win on conflicting keys; other existing labels are
    /// kept. The fingerprint read before merging is checked again right
    /// before writing, and a mismatch aborts with
    /// [`ReconcileError::LabelConflict`]. Only the changed requested keys are
    /// sent: `add-labels` merges server side under its own fingerprint, so
    /// labels written by others after the last read are never reverted.
    /// Returns whether anything was written.
    pub fn apply_labels(
        &self,
        instance: &str,
        zone: &str,
        requested: &BTreeMap<String, String>,
    ) -> ReconcileResult<bool> {
        let before = self.describe_labels(instance, zone)?;
        let changed: BTreeMap<&String, &String> = requested
            .iter()
            .filter(|(k, v)| before.labels.get(*k) != Some(*v))
            .collect();
        if changed.is_empty() {
            debug!(instance, "requested labels already present");
            return Ok(false);
        }

        let current = self.describe_labels(instance, zone)?;
        if current.fingerprint != before.fingerprint {
            return Err(ReconcileError::LabelConflict {
                instance: instance.to_string(),
                expected: before.fingerprint,
                found: current.fingerprint,
            });
        }

        let flag = changed
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        self.cloud.invoke(
            "compute",
            "instances",
            &["add-labels", instance, "--zone", zone, "--labels", flag.as_str()],
        )?;
        info!(instance, zone, labels = %flag, "labelled instance");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use iambroker_cloud::fake::FakeCloud;
    use iambroker_cloud::{CloudIam, CloudResult};
    use serde_json::json;

    use super::super::test_support::{context, no_wait};
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn merges_with_existing_labels() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        cloud.add_instance("vm-0", &[("b", "2")]);
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        assert!(p.apply_labels("vm-0", "us-east1-b", &labels(&[("a", "1")])).unwrap());
        assert_eq!(cloud.instance_labels("vm-0"), labels(&[("a", "1"), ("b", "2")]));
        assert!(
            cloud
                .calls()
                .iter()
                .any(|c| c.ends_with("--labels a=1"))
        );
    }

    /// Relabels the instance out of band just before `add-labels` reaches it.
    struct LateWriter<'a> {
        inner: &'a FakeCloud,
    }

    impl CloudIam for LateWriter<'_> {
        fn invoke(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<Value> {
            if args.first() == Some(&"add-labels") {
                self.inner.relabel_externally("vm-0", "b", "3");
            }
            self.inner.invoke(group, subgroup, args)
        }

        fn invoke_stderr(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<String> {
            self.inner.invoke_stderr(group, subgroup, args)
        }
    }

    #[test]
    fn change_after_last_read_is_not_reverted() {
        let ctx = context();
        let fake = FakeCloud::new("proj");
        fake.add_instance("vm-0", &[("b", "2")]);
        let cloud = LateWriter { inner: &fake };
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        assert!(p.apply_labels("vm-0", "z", &labels(&[("a", "1")])).unwrap());
        assert_eq!(fake.instance_labels("vm-0"), labels(&[("a", "1"), ("b", "3")]));
        assert!(!fake.calls().iter().any(|c| c.contains("b=2")));
    }

    #[test]
    fn only_changed_keys_are_written() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        cloud.add_instance("vm-0", &[("a", "1"), ("role", "old")]);
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        p.apply_labels("vm-0", "z", &labels(&[("a", "1"), ("role", "worker")]))
            .unwrap();
        let writes: Vec<String> = cloud
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("compute instances add-labels"))
            .collect();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].ends_with("--labels role=worker"));
    }

    #[test]
    fn requested_value_wins() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        cloud.add_instance("vm-0", &[("role", "old")]);
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        p.apply_labels("vm-0", "z", &labels(&[("role", "worker")]))
            .unwrap();
        assert_eq!(cloud.instance_labels("vm-0"), labels(&[("role", "worker")]));
    }

    #[test]
    fn present_labels_skip_the_write() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        cloud.add_instance("vm-0", &[("a", "1"), ("b", "2")]);
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        assert!(!p.apply_labels("vm-0", "z", &labels(&[("a", "1")])).unwrap());
        assert_eq!(cloud.count_calls("compute instances add-labels"), 0);
        assert_eq!(cloud.count_calls("compute instances describe"), 1);
    }

    #[test]
    fn concurrent_change_aborts_write() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        cloud.add_instance("vm-0", &[("b", "2")]);
        cloud.race_next_describe("vm-0");
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        let err = p
            .apply_labels("vm-0", "z", &labels(&[("a", "1")]))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::LabelConflict { .. }));
        assert_eq!(cloud.count_calls("compute instances add-labels"), 0);
        assert!(!cloud.instance_labels("vm-0").contains_key("a"));
    }

    #[test]
    fn unknown_instance_is_an_error() {
        let ctx = context();
        let cloud = FakeCloud::new("proj");
        let retry = no_wait();
        let p = Provisioner::new(&ctx, &cloud, &retry);

        let err = p.apply_labels("ghost", "z", &labels(&[("a", "1")])).unwrap_err();
        assert!(matches!(err, ReconcileError::Cloud(e) if e.is_not_found()));
    }

    #[test]
    fn snapshot_tolerates_missing_labels() {
        let snapshot =
            LabelSnapshot::from_described(&json!({ "name": "vm", "labelFingerprint": "abc" }))
                .unwrap();
        assert!(snapshot.labels.is_empty());
        assert_eq!(snapshot.fingerprint, "abc");

        assert!(LabelSnapshot::from_described(&json!({ "labels": { "a": 1 } })).is_err());
        assert!(LabelSnapshot::from_described(&json!([])).is_err());
    }
}
