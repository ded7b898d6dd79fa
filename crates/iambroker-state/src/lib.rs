//! iambroker-state — durable provisioning state for the IAM broker.
//!
//! Backed by [redb](https://docs.rs/redb). Every record lives in a single
//! key-value table with dotted, namespaced keys (`broker.account-keys.<relation>`)
//! so related records can be fetched or dropped with one prefix scan.
//!
//! # Architecture
//!
//! Values are JSON-serialized into redb's `&[u8]` value column. Each write
//! runs in its own redb write transaction, so a crash mid-update leaves
//! either the old value or the new one, never a torn record.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod keys;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use keys::ManagedEntities;
pub use store::StateStore;
