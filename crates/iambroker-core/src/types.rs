//! Request types shared by the broker crates.
//!
//! A [`CapabilityRequest`] is what a peer unit declares over its relation:
//! which instance it runs on, which labels it wants applied, and which
//! permission bundles its application needs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of the relation a request arrived on (e.g. `"gcp:12"`).
pub type RelationId = String;

/// A permission bundle a peer can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    InstanceInspection,
    NetworkManagement,
    SecurityManagement,
    BlockStorageManagement,
    DnsManagement,
    ObjectStorageRead,
    ObjectStorageWrite,
    LoadBalancerManagement,
}

impl Capability {
    /// Every capability, in the order grants are applied.
    pub const ALL: [Capability; 8] = [
        Capability::InstanceInspection,
        Capability::NetworkManagement,
        Capability::SecurityManagement,
        Capability::LoadBalancerManagement,
        Capability::BlockStorageManagement,
        Capability::DnsManagement,
        Capability::ObjectStorageRead,
        Capability::ObjectStorageWrite,
    ];

    /// Human-readable name used in log lines.
    pub fn describe(self) -> &'static str {
        match self {
            Capability::InstanceInspection => "instance inspection",
            Capability::NetworkManagement => "network management",
            Capability::SecurityManagement => "security management",
            Capability::BlockStorageManagement => "block storage management",
            Capability::DnsManagement => "DNS management",
            Capability::ObjectStorageRead => "object storage read",
            Capability::ObjectStorageWrite => "object storage management",
            Capability::LoadBalancerManagement => "load balancer management",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Boolean capability flags as they appear on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CapabilityFlags {
    pub instance_inspection: bool,
    pub network_management: bool,
    pub security_management: bool,
    pub block_storage_management: bool,
    pub dns_management: bool,
    pub object_storage_read: bool,
    pub object_storage_write: bool,
    pub load_balancer_management: bool,
}

impl CapabilityFlags {
    /// Whether the given capability flag is set.
    pub fn contains(&self, capability: Capability) -> bool {
        match capability {
            Capability::InstanceInspection => self.instance_inspection,
            Capability::NetworkManagement => self.network_management,
            Capability::SecurityManagement => self.security_management,
            Capability::BlockStorageManagement => self.block_storage_management,
            Capability::DnsManagement => self.dns_management,
            Capability::ObjectStorageRead => self.object_storage_read,
            Capability::ObjectStorageWrite => self.object_storage_write,
            Capability::LoadBalancerManagement => self.load_balancer_management,
        }
    }

    /// Set capabilities in grant order.
    pub fn requested(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.contains(*c))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requested().is_empty()
    }
}

/// A peer unit's declared need for cloud access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CapabilityRequest {
    pub relation_id: RelationId,
    /// Requesting unit, e.g. `"kubernetes-worker/0"`.
    pub unit_name: String,
    pub application_name: String,
    /// Model (cluster) the requesting application lives in.
    pub model_uuid: String,
    /// Compute instance the unit runs on.
    pub instance: String,
    pub zone: String,
    #[serde(default)]
    pub instance_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: CapabilityFlags,
    /// Bucket or `bucket/prefix` patterns limiting object storage read grants.
    #[serde(default)]
    pub object_storage_read_patterns: Vec<String>,
    /// Bucket or `bucket/prefix` patterns limiting object storage write grants.
    #[serde(default)]
    pub object_storage_write_patterns: Vec<String>,
    /// Whether the relation already received service-account key material.
    #[serde(default)]
    pub has_credentials: bool,
}

impl CapabilityRequest {
    /// Access patterns scoping the given capability, if it is an object storage one.
    pub fn access_patterns(&self, capability: Capability) -> &[String] {
        match capability {
            Capability::ObjectStorageRead => &self.object_storage_read_patterns,
            Capability::ObjectStorageWrite => &self.object_storage_write_patterns,
            _ => &[],
        }
    }
}

/// Registry record for a key issued to a relation.
///
/// Only identifiers are kept; the key material itself is handed to the
/// relation once and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccountKey {
    pub service_account: String,
    pub id: String,
    #[serde(default)]
    pub application_name: Option<String>,
}
