//! Reconciliation error types.

use iambroker_cloud::CloudError;
use iambroker_state::StateError;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::ports::SourceError;

/// Errors that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("request source error: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("labels on {instance} changed concurrently (expected fingerprint {expected}, found {found})")]
    LabelConflict {
        instance: String,
        expected: String,
        found: String,
    },

    #[error("no cloud project activated")]
    NoProject,

    #[error("key material i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
