//! iambroker-core — shared vocabulary for the IAM broker.
//!
//! Capability requests and flags, the role bundle behind each capability,
//! service-account naming, and the `broker.toml` configuration.

pub mod config;
pub mod naming;
pub mod roles;
pub mod types;

pub use config::{BrokerConfig, ConfigError};
pub use naming::{elide, service_account_name};
pub use roles::{BindingCondition, CustomRoleSpec, FOUNDATION_ROLES, INSTANCE_STORAGE_ADMIN, RoleBinding, RoleRef};
pub use types::*;
