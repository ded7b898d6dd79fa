//! Role bundles granted for each capability.
//!
//! Most capabilities map onto built-in roles. Block storage needs
//! attach/detach permissions that no built-in role carries on its own, so it
//! also depends on a project-scoped custom role.

use serde::{Deserialize, Serialize};

use crate::types::Capability;

/// Roles every broker-created service account gets on creation.
pub const FOUNDATION_ROLES: [&str; 2] = [
    "roles/iam.serviceAccountUser",
    "roles/iam.serviceAccountTokenCreator",
];

/// Definition of a project-scoped custom role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomRoleSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub permissions: &'static [&'static str],
}

pub const INSTANCE_STORAGE_ADMIN: CustomRoleSpec = CustomRoleSpec {
    name: "compute.instanceStorageAdmin",
    title: "Storage admin for instances",
    description: "Attach and remove disks to instances",
    permissions: &["compute.instances.attachDisk", "compute.instances.detachDisk"],
};

impl CustomRoleSpec {
    /// Fully-qualified role path within `project`.
    pub fn qualified(&self, project: &str) -> String {
        format!("projects/{project}/roles/{}", self.name)
    }
}

/// A role reference inside a capability bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRef {
    Builtin(&'static str),
    Custom(&'static CustomRoleSpec),
}

impl RoleRef {
    /// Role identifier as accepted by a policy binding.
    pub fn qualified(&self, project: &str) -> String {
        match self {
            RoleRef::Builtin(name) => (*name).to_string(),
            RoleRef::Custom(spec) => spec.qualified(project),
        }
    }
}

impl Capability {
    /// Roles granted for this capability, in grant order.
    pub fn role_bundle(self) -> &'static [RoleRef] {
        match self {
            Capability::InstanceInspection => &[RoleRef::Builtin("roles/compute.viewer")],
            Capability::NetworkManagement => &[RoleRef::Builtin("roles/compute.networkAdmin")],
            Capability::SecurityManagement => &[RoleRef::Builtin("roles/compute.securityAdmin")],
            Capability::LoadBalancerManagement => {
                &[RoleRef::Builtin("roles/compute.loadBalancerAdmin")]
            }
            Capability::BlockStorageManagement => &[
                RoleRef::Builtin("roles/compute.storageAdmin"),
                RoleRef::Custom(&INSTANCE_STORAGE_ADMIN),
            ],
            Capability::DnsManagement => &[RoleRef::Builtin("roles/dns.admin")],
            Capability::ObjectStorageRead => &[RoleRef::Builtin("roles/storage.objectViewer")],
            Capability::ObjectStorageWrite => &[RoleRef::Builtin("roles/storage.objectAdmin")],
        }
    }

    /// Custom roles that must exist before this capability's bundle is bound.
    pub fn custom_roles(self) -> impl Iterator<Item = &'static CustomRoleSpec> {
        self.role_bundle().iter().filter_map(|r| match r {
            RoleRef::Custom(spec) => Some(*spec),
            RoleRef::Builtin(_) => None,
        })
    }
}

/// IAM condition attached to a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingCondition {
    pub title: String,
    pub expression: String,
}

impl BindingCondition {
    /// Render as the value of a `--condition` flag.
    pub fn to_flag_value(&self) -> String {
        format!("expression={},title={}", self.expression, self.title)
    }

    /// Restrict a storage binding to the buckets / object prefixes in `patterns`.
    ///
    /// A pattern is `bucket`, `bucket/*` or `bucket/prefix*`. Returns `None`
    /// when there are no usable patterns, meaning the binding is project-wide.
    pub fn for_storage_patterns(title: &str, patterns: &[String]) -> Option<Self> {
        let clauses: Vec<String> = patterns
            .iter()
            .filter_map(|p| storage_clause(p))
            .collect();
        if clauses.is_empty() {
            return None;
        }
        Some(Self {
            title: title.to_string(),
            expression: clauses.join(" || "),
        })
    }
}

fn storage_clause(pattern: &str) -> Option<String> {
    let pattern = pattern.trim().trim_end_matches('*');
    let (bucket, prefix) = match pattern.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix),
        None => (pattern, ""),
    };
    if bucket.is_empty() {
        return None;
    }
    let resource = if prefix.is_empty() {
        format!("projects/_/buckets/{bucket}")
    } else {
        format!("projects/_/buckets/{bucket}/objects/{prefix}")
    };
    Some(format!("resource.name.startsWith(\"{resource}\")"))
}

/// A concrete (role, optional condition) pair to bind to a service account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub role: String,
    pub condition: Option<BindingCondition>,
}

impl RoleBinding {
    pub fn unconditional(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            condition: None,
        }
    }
}
