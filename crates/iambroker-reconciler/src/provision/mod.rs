//! Idempotent IAM operations used by a reconciliation pass.
//!
//! A [`Provisioner`] borrows the context, the cloud handle and the retry
//! policy for the duration of a pass. Every operation is safe to repeat:
//! existing entities are detected before anything is created, and
//! Not-Found answers caused by propagation delay are retried under the
//! [`RetryPolicy`].

mod accounts;
mod cleanup;
mod grants;
mod keys;
mod labels;

use iambroker_cloud::{CloudIam, RetryPolicy};

use crate::context::ReconcilerContext;

pub use accounts::ServiceAccount;
pub use grants::Grant;
pub use keys::extract_key_id;
pub use labels::LabelSnapshot;

/// IAM operations bound to one context and cloud handle.
pub struct Provisioner<'a> {
    ctx: &'a ReconcilerContext,
    cloud: &'a dyn CloudIam,
    retry: &'a RetryPolicy,
}

impl<'a> Provisioner<'a> {
    pub fn new(ctx: &'a ReconcilerContext, cloud: &'a dyn CloudIam, retry: &'a RetryPolicy) -> Self {
        Self { ctx, cloud, retry }
    }
}
