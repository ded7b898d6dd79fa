//! In-memory simulated project implementing [`CloudIam`].
//!
//! Understands the calls the broker issues (service accounts, keys, custom
//! roles, policy bindings, instance labels, auth activation), records every
//! call it receives, and can be told to fail calls to exercise error paths.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use serde_json::{Value, json};

use crate::client::CloudIam;
use crate::error::{CloudError, CloudResult};

#[derive(Debug, Default)]
struct Instance {
    labels: BTreeMap<String, String>,
    fingerprint: u64,
}

#[derive(Debug)]
struct Injected {
    prefix: String,
    message: String,
    remaining: u32,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<String>,
    service_accounts: BTreeSet<String>,
    /// key id → owning account email.
    keys: BTreeMap<String, String>,
    next_key: u32,
    custom_roles: BTreeSet<String>,
    /// (member, role, condition expression) triples.
    bindings: BTreeSet<(String, String, Option<String>)>,
    instances: BTreeMap<String, Instance>,
    /// Instance whose labels change externally right after the next describe.
    racing_instance: Option<String>,
    injected: VecDeque<Injected>,
    key_stderr_override: Option<String>,
    activated_key_files: Vec<String>,
}

/// Simulated cloud project.
#[derive(Debug)]
pub struct FakeCloud {
    project: String,
    state: Mutex<FakeState>,
}

fn flag<'a>(args: &[&'a str], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == name)
        .and_then(|i| args.get(i + 1).copied())
}

/// Arguments that are neither `--flag` nor a flag's value.
fn positionals<'a>(args: &[&'a str]) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with("--") {
            iter.next();
        } else {
            out.push(*arg);
        }
    }
    out
}

fn not_found(command: &str, what: &str) -> CloudError {
    CloudError::from_message(format!("ERROR: (gcloud.{command}) NOT_FOUND: {what} does not exist."))
}

fn already_exists(command: &str, what: &str) -> CloudError {
    CloudError::from_message(format!("ERROR: (gcloud.{command}) ALREADY_EXISTS: {what} already exists."))
}

impl FakeCloud {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn email_for(&self, account_id: &str) -> String {
        format!("{account_id}@{}.iam.gserviceaccount.com", self.project)
    }

    // ── Setup ──────────────────────────────────────────────────────

    /// Add a service account that already exists in the project.
    pub fn add_service_account(&self, account_id: &str) -> String {
        let email = self.email_for(account_id);
        self.lock().service_accounts.insert(email.clone());
        email
    }

    /// Add an existing key owned by `email`.
    pub fn add_key(&self, email: &str, key_id: &str) {
        self.lock().keys.insert(key_id.to_string(), email.to_string());
    }

    pub fn add_instance(&self, name: &str, labels: &[(&str, &str)]) {
        let instance = Instance {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fingerprint: 1,
        };
        self.lock().instances.insert(name.to_string(), instance);
    }

    /// Change an instance's labels out of band, invalidating its fingerprint.
    pub fn relabel_externally(&self, name: &str, key: &str, value: &str) {
        let mut state = self.lock();
        if let Some(instance) = state.instances.get_mut(name) {
            instance.labels.insert(key.to_string(), value.to_string());
            instance.fingerprint += 1;
        }
    }

    /// Simulate a concurrent writer relabelling `name` right after the broker reads it.
    pub fn race_next_describe(&self, name: &str) {
        self.lock().racing_instance = Some(name.to_string());
    }

    /// Fail the next `times` calls whose command line starts with `prefix`.
    pub fn fail_next(&self, prefix: &str, message: &str, times: u32) {
        self.lock().injected.push_back(Injected {
            prefix: prefix.to_string(),
            message: message.to_string(),
            remaining: times,
        });
    }

    /// Make key creation succeed with this stderr text instead of the usual one.
    pub fn override_key_stderr(&self, stderr: &str) {
        self.lock().key_stderr_override = Some(stderr.to_string());
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Every call received, as `group subgroup args...`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn service_accounts(&self) -> BTreeSet<String> {
        self.lock().service_accounts.clone()
    }

    pub fn key_ids(&self) -> BTreeSet<String> {
        self.lock().keys.keys().cloned().collect()
    }

    pub fn custom_roles(&self) -> BTreeSet<String> {
        self.lock().custom_roles.clone()
    }

    /// Roles bound to `email`, unconditional or not.
    pub fn roles_of(&self, email: &str) -> BTreeSet<String> {
        let member = format!("serviceAccount:{email}");
        self.lock()
            .bindings
            .iter()
            .filter(|(m, _, _)| *m == member)
            .map(|(_, role, _)| role.clone())
            .collect()
    }

    /// Condition expression on the binding of `role` to `email`, if any.
    pub fn binding_condition(&self, email: &str, role: &str) -> Option<String> {
        let member = format!("serviceAccount:{email}");
        self.lock()
            .bindings
            .iter()
            .find(|(m, r, _)| *m == member && r == role)
            .and_then(|(_, _, c)| c.clone())
    }

    pub fn instance_labels(&self, name: &str) -> BTreeMap<String, String> {
        self.lock()
            .instances
            .get(name)
            .map(|i| i.labels.clone())
            .unwrap_or_default()
    }

    pub fn activated_key_files(&self) -> Vec<String> {
        self.lock().activated_key_files.clone()
    }

    // ── Dispatch ───────────────────────────────────────────────────

    fn record(&self, line: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.calls.push(line.to_string());
        if let Some(pos) = state
            .injected
            .iter()
            .position(|i| i.remaining > 0 && line.starts_with(&i.prefix))
        {
            let injected = &mut state.injected[pos];
            injected.remaining -= 1;
            let message = injected.message.clone();
            if injected.remaining == 0 {
                state.injected.remove(pos);
            }
            return Err(CloudError::from_message(message));
        }
        Ok(())
    }

    fn dispatch(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<Value> {
        let pos = positionals(args);
        let verb = pos.first().copied().unwrap_or_default();
        let mut state = self.lock();

        match (group, subgroup, verb) {
            ("auth", "activate-service-account", _) => {
                let file = flag(args, "--key-file").unwrap_or_default();
                state.activated_key_files.push(file.to_string());
                Ok(Value::Null)
            }
            ("iam", "service-accounts", "list") => Ok(Value::Array(
                state
                    .service_accounts
                    .iter()
                    .map(|email| json!({ "email": email }))
                    .collect(),
            )),
            ("iam", "service-accounts", "create") => {
                let id = pos.get(1).copied().unwrap_or_default();
                let email = self.email_for(id);
                if !state.service_accounts.insert(email.clone()) {
                    return Err(already_exists("iam.service-accounts.create", &email));
                }
                Ok(json!({ "email": email }))
            }
            ("iam", "service-accounts", "keys") if pos.get(1) == Some(&"delete") => {
                let account = flag(args, "--iam-account").unwrap_or_default();
                let key_id = pos.get(2).copied().unwrap_or_default();
                let owned = state.keys.get(key_id).is_some_and(|owner| owner == account);
                if !owned {
                    return Err(not_found("iam.service-accounts.keys.delete", key_id));
                }
                state.keys.remove(key_id);
                Ok(Value::Null)
            }
            ("iam", "roles", "list") => Ok(Value::Array(
                state
                    .custom_roles
                    .iter()
                    .map(|name| json!({ "name": format!("projects/{}/roles/{name}", self.project) }))
                    .collect(),
            )),
            ("iam", "roles", "create") => {
                let name = pos.get(1).copied().unwrap_or_default();
                if !state.custom_roles.insert(name.to_string()) {
                    return Err(already_exists("iam.roles.create", name));
                }
                Ok(json!({ "name": format!("projects/{}/roles/{name}", self.project) }))
            }
            ("projects", "add-iam-policy-binding", _) => {
                let member = flag(args, "--member").unwrap_or_default();
                let role = flag(args, "--role").unwrap_or_default();
                let email = member.trim_start_matches("serviceAccount:");
                if !state.service_accounts.contains(email) {
                    return Err(not_found("projects.add-iam-policy-binding", email));
                }
                if let Some((_, custom)) = role.rsplit_once("/roles/")
                    && role.starts_with("projects/")
                    && !state.custom_roles.contains(custom)
                {
                    return Err(not_found("projects.add-iam-policy-binding", role));
                }
                let condition = flag(args, "--condition").map(|c| {
                    c.trim_start_matches("expression=")
                        .rsplit_once(",title=")
                        .map(|(expr, _)| expr.to_string())
                        .unwrap_or_else(|| c.to_string())
                });
                state
                    .bindings
                    .insert((member.to_string(), role.to_string(), condition));
                Ok(json!({ "bindings": [] }))
            }
            ("compute", "instances", "describe") => {
                let name = pos.get(1).copied().unwrap_or_default();
                let racing = state.racing_instance.as_deref() == Some(name);
                let Some(instance) = state.instances.get_mut(name) else {
                    return Err(not_found("compute.instances.describe", name));
                };
                let described = json!({
                    "name": name,
                    "labels": instance.labels,
                    "labelFingerprint": instance.fingerprint.to_string(),
                });
                if racing {
                    instance.labels.insert("touched-by".to_string(), "someone-else".to_string());
                    instance.fingerprint += 1;
                    state.racing_instance = None;
                }
                Ok(described)
            }
            ("compute", "instances", "add-labels") => {
                let name = pos.get(1).copied().unwrap_or_default();
                let labels = flag(args, "--labels").unwrap_or_default();
                let Some(instance) = state.instances.get_mut(name) else {
                    return Err(not_found("compute.instances.add-labels", name));
                };
                for (k, v) in labels.split(',').filter_map(|kv| kv.split_once('=')) {
                    instance.labels.insert(k.to_string(), v.to_string());
                }
                instance.fingerprint += 1;
                Ok(Value::Null)
            }
            _ => Err(CloudError::from_message(format!(
                "ERROR: (gcloud) unsupported call: {group} {subgroup} {}",
                args.join(" ")
            ))),
        }
    }

    fn create_key(&self, args: &[&str]) -> CloudResult<String> {
        let account = flag(args, "--iam-account").unwrap_or_default();
        let path = positionals(args).get(2).copied().unwrap_or_default();
        let mut state = self.lock();
        if !state.service_accounts.contains(account) {
            return Err(not_found("iam.service-accounts.keys.create", account));
        }
        state.next_key += 1;
        let key_id = format!("key{:04}", state.next_key);
        let material = json!({
            "type": "service_account",
            "project_id": self.project,
            "private_key_id": key_id,
            "client_email": account,
        });
        std::fs::write(path, material.to_string())
            .map_err(|e| CloudError::from_message(format!("ERROR: (gcloud) cannot write {path}: {e}")))?;
        state.keys.insert(key_id.clone(), account.to_string());
        Ok(state.key_stderr_override.clone().unwrap_or_else(|| {
            format!("created key [{key_id}] of type [json] as [{path}] for [{account}]")
        }))
    }
}

impl CloudIam for FakeCloud {
    fn invoke(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<Value> {
        self.record(&format!("{group} {subgroup} {}", args.join(" ")))?;
        self.dispatch(group, subgroup, args)
    }

    fn invoke_stderr(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<String> {
        self.record(&format!("{group} {subgroup} {}", args.join(" ")))?;
        match (group, subgroup, positionals(args).as_slice()) {
            ("iam", "service-accounts", ["keys", "create", ..]) => self.create_key(args),
            _ => self.dispatch(group, subgroup, args).map(|v| v.to_string()),
        }
    }
}
