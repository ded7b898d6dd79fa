//! iambroker-cloud — the broker's boundary to the cloud provider.
//!
//! # Components
//!
//! - **`client`** — the [`CloudIam`] call primitive and its `gcloud` CLI backend
//! - **`error`** — [`CloudError`] and the message classifier that sorts
//!   provider failures into [`ErrorKind::NotFound`] / [`ErrorKind::AlreadyExists`]
//! - **`retry`** — waits out "not found yet" answers from the eventually
//!   consistent IAM API (4 attempts, 10s/20s/30s)
//! - **`fake`** (feature `fake`) — an in-memory simulated project for tests

pub mod client;
pub mod error;
pub mod retry;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use client::{CloudIam, GcloudCli};
pub use error::{CloudError, CloudResult, ErrorKind, classify};
pub use retry::{RetryPolicy, retry_not_found_with};
