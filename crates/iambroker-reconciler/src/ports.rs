//! Collaborators the reconciler drives but does not own.

use std::collections::BTreeSet;

use iambroker_core::{CapabilityRequest, RelationId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::CredentialError;

/// Errors raised by a [`RequestSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request data: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown relation: {0}")]
    UnknownRelation(String),
}

/// Where capability requests come from.
pub trait RequestSource: Send {
    /// Requests still waiting to be granted, in arrival order.
    fn requests(&mut self) -> Result<Vec<CapabilityRequest>, SourceError>;

    /// Every relation currently established, pending or not.
    fn relation_ids(&mut self) -> Result<BTreeSet<RelationId>, SourceError>;

    /// Hand freshly issued key material to the relation.
    fn attach_credentials(&mut self, relation_id: &str, material: &str) -> Result<(), SourceError>;

    /// Acknowledge a batch of fully granted requests.
    fn mark_completed(&mut self, relation_ids: &[RelationId]) -> Result<(), SourceError>;
}

/// Coarse process status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Maintenance,
    Active,
    Blocked,
}

/// Receives status updates.
pub trait StatusSink: Send {
    fn set(&mut self, status: Status, message: &str);

    fn maintenance(&mut self, message: &str) {
        self.set(Status::Maintenance, message);
    }

    fn active(&mut self, message: &str) {
        self.set(Status::Active, message);
    }

    fn blocked(&mut self, message: &str) {
        self.set(Status::Blocked, message);
    }
}

/// Supplies raw service-account key material.
pub trait CredentialProvider: Send {
    fn get(&self) -> Result<String, CredentialError>;
}
