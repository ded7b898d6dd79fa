//! Broker lifecycle state machine.
//!
//! Transitions are pure; the [`Reconciler`](crate::Reconciler) observes the
//! world, feeds the resulting [`Event`] through [`BrokerState::next`], and
//! runs the entry action of the state it lands in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the broker is in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum BrokerState {
    /// No activated credentials; nothing can be reconciled.
    #[default]
    CredentialsMissing,
    /// Credentials active, waiting to observe the request source.
    AwaitingRequests,
    /// Pending requests are being granted (active mode).
    Reconciling,
    /// No pending requests; stale keys are swept (idle mode).
    Idle,
    /// The last pass or sweep failed. Retried on the next trigger.
    Blocked { reason: String },
}

/// Something the reconciler observed or finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Credentials configuration changed; re-activation required.
    CredentialsChanged,
    /// Key material obtained, written and activated.
    CredentialsActivated,
    /// No usable credentials yet.
    CredentialsUnavailable { reason: String },
    RequestsPending,
    NoPendingRequests,
    PassSucceeded,
    PassFailed { reason: String },
    SweepSucceeded,
    SweepFailed { reason: String },
}

impl BrokerState {
    /// State reached from `self` on `event`.
    pub fn next(&self, event: &Event) -> BrokerState {
        use BrokerState::*;

        match (self, event) {
            (_, Event::CredentialsChanged) => CredentialsMissing,
            (CredentialsMissing, Event::CredentialsActivated) => AwaitingRequests,
            (CredentialsMissing, _) => CredentialsMissing,
            (_, Event::RequestsPending) => Reconciling,
            (_, Event::NoPendingRequests) => Idle,
            (Reconciling, Event::PassSucceeded) => AwaitingRequests,
            (Idle, Event::SweepSucceeded) => Idle,
            (_, Event::PassFailed { reason } | Event::SweepFailed { reason }) => Blocked {
                reason: reason.clone(),
            },
            (state, _) => state.clone(),
        }
    }

    /// Whether the broker may talk to the cloud in this state.
    pub fn has_credentials(&self) -> bool {
        !matches!(self, BrokerState::CredentialsMissing)
    }
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerState::CredentialsMissing => f.write_str("credentials-missing"),
            BrokerState::AwaitingRequests => f.write_str("awaiting-requests"),
            BrokerState::Reconciling => f.write_str("reconciling"),
            BrokerState::Idle => f.write_str("idle"),
            BrokerState::Blocked { reason } => write!(f, "blocked ({reason})"),
        }
    }
}
