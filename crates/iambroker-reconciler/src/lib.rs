//! iambroker-reconciler — turns capability requests into cloud IAM state.
//!
//! Each pass maps pending [`CapabilityRequest`]s onto idempotent IAM
//! actions, keeps a durable record of what it provisioned in the
//! [`StateStore`], waits out the provider's propagation delay, and revokes
//! keys whose relation has gone away.
//!
//! # Architecture
//!
//! ```text
//! Reconciler (state machine: CredentialsMissing → AwaitingRequests → Reconciling | Idle, Blocked)
//!   ├── CredentialProvider → activate key file, record project
//!   ├── RequestSource      → pending requests, live relation ids, acknowledgements
//!   ├── StatusSink         → maintenance / active / blocked
//!   └── Provisioner (per pass)
//!       ├── resolve_service_account  cache → list → create
//!       ├── issue_key / delete_key   key registry in the StateStore
//!       ├── enable_capability        custom roles + policy bindings
//!       └── apply_labels             fingerprint-checked merge
//! ```
//!
//! [`CapabilityRequest`]: iambroker_core::CapabilityRequest
//! [`StateStore`]: iambroker_state::StateStore

pub mod context;
pub mod credentials;
pub mod error;
pub mod machine;
pub mod ports;
pub mod provision;
pub mod reconcile;

pub use context::ReconcilerContext;
pub use credentials::{ChainProvider, ConfigProvider, CredentialError, TrustHookProvider};
pub use error::{ReconcileError, ReconcileResult};
pub use machine::{BrokerState, Event};
pub use ports::{CredentialProvider, RequestSource, SourceError, Status, StatusSink};
pub use provision::{Provisioner, ServiceAccount};
pub use reconcile::{PassReport, Reconciler};
