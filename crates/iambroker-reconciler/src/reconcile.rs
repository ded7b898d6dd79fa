//! The reconciliation loop.
//!
//! One [`Reconciler::tick`] activates credentials if needed, observes the
//! request source, and then either grants every pending request (active
//! mode) or sweeps keys left behind by departed relations (idle mode).
//! Failures report a blocked status and leave the remaining work for the
//! next tick.

use std::collections::BTreeSet;

use iambroker_cloud::{CloudIam, RetryPolicy};
use iambroker_core::{CapabilityRequest, FOUNDATION_ROLES, RelationId};
use tracing::{debug, error, info, warn};

use crate::context::ReconcilerContext;
use crate::credentials;
use crate::error::ReconcileResult;
use crate::machine::{BrokerState, Event};
use crate::ports::{CredentialProvider, RequestSource, StatusSink};
use crate::provision::Provisioner;

/// Outcome of a successful active pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Relations acknowledged, in processing order.
    pub completed: Vec<RelationId>,
}

/// Drives the broker: owns the context, the collaborators and the state.
pub struct Reconciler {
    ctx: ReconcilerContext,
    cloud: Box<dyn CloudIam>,
    retry: RetryPolicy,
    source: Box<dyn RequestSource>,
    status: Box<dyn StatusSink>,
    credentials: Box<dyn CredentialProvider>,
    state: BrokerState,
}

impl Reconciler {
    pub fn new(
        ctx: ReconcilerContext,
        cloud: Box<dyn CloudIam>,
        source: Box<dyn RequestSource>,
        status: Box<dyn StatusSink>,
        credentials: Box<dyn CredentialProvider>,
    ) -> Self {
        Self {
            ctx,
            cloud,
            retry: RetryPolicy::default(),
            source,
            status,
            credentials,
            state: BrokerState::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> &BrokerState {
        &self.state
    }

    pub fn context(&self) -> &ReconcilerContext {
        &self.ctx
    }

    /// Swap in a new credential provider and require re-activation.
    pub fn credentials_changed(&mut self, provider: Box<dyn CredentialProvider>) {
        info!("credentials configuration changed");
        self.credentials = provider;
        self.advance(Event::CredentialsChanged);
    }

    /// Run one observation and the work it calls for.
    pub fn tick(&mut self) -> &BrokerState {
        if !self.ensure_credentials() {
            return &self.state;
        }

        let requests = match self.source.requests() {
            Ok(requests) => requests,
            Err(e) => {
                let reason = format!("cannot read requests: {e}");
                error!(error = %e, "failed to read pending requests");
                self.status.blocked(&reason);
                self.advance(Event::PassFailed { reason });
                return &self.state;
            }
        };

        if requests.is_empty() {
            self.advance(Event::NoPendingRequests);
        } else {
            self.advance(Event::RequestsPending);
        }

        match self.state {
            BrokerState::Reconciling => {
                let event = match self.run_pass(&requests) {
                    Ok(report) => {
                        info!(completed = report.completed.len(), "reconciliation pass complete");
                        self.status.active("ready");
                        Event::PassSucceeded
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        self.status.blocked(&reason);
                        Event::PassFailed { reason }
                    }
                };
                self.advance(event);
            }
            BrokerState::Idle => {
                let event = match self.sweep() {
                    Ok(_) => {
                        self.status.active("ready");
                        Event::SweepSucceeded
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        error!(error = %e, "cleanup sweep failed");
                        self.status.blocked(&reason);
                        Event::SweepFailed { reason }
                    }
                };
                self.advance(event);
            }
            _ => {}
        }
        &self.state
    }

    /// Activate credentials unless already active. Returns whether they are.
    pub fn ensure_credentials(&mut self) -> bool {
        if self.state.has_credentials() {
            return true;
        }
        match credentials::activate(&mut self.ctx, &*self.cloud, &*self.credentials) {
            Ok(_) => {
                self.advance(Event::CredentialsActivated);
                true
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %e, detail = ?e, "credentials unavailable");
                self.status.blocked(&reason);
                self.advance(Event::CredentialsUnavailable { reason });
                false
            }
        }
    }

    /// Grant `requests` in order, acknowledging the completed ones in a
    /// single batch.
    ///
    /// On the first failure the requests finished so far are still
    /// acknowledged and the rest stay pending.
    pub fn run_pass(&mut self, requests: &[CapabilityRequest]) -> ReconcileResult<PassReport> {
        let mut completed = Vec::with_capacity(requests.len());

        for request in requests {
            self.status
                .maintenance(&format!("granting request for {}", request.unit_name));
            if let Err(e) = self.grant(request) {
                error!(
                    relation = %request.relation_id,
                    unit = %request.unit_name,
                    error = %e,
                    "failed to grant request"
                );
                self.acknowledge(&completed)?;
                return Err(e);
            }
            completed.push(request.relation_id.clone());
        }

        self.acknowledge(&completed)?;
        Ok(PassReport { completed })
    }

    /// Revoke keys of relations that no longer exist.
    pub fn sweep(&mut self) -> ReconcileResult<Vec<RelationId>> {
        let live: BTreeSet<RelationId> = self.source.relation_ids()?;
        self.status.maintenance("cleaning up unused cloud entities");
        Provisioner::new(&self.ctx, &*self.cloud, &self.retry).sweep_stale_keys(&live)
    }

    fn grant(&mut self, request: &CapabilityRequest) -> ReconcileResult<()> {
        let provisioner = Provisioner::new(&self.ctx, &*self.cloud, &self.retry);
        let store = &self.ctx.store;
        let application = request.application_name.as_str();

        // A labels-only request never touches the service account.
        let needs_account = !request.has_credentials || !request.capabilities.is_empty();
        let mut managed = store.managed_entities(application)?;
        let email = if needs_account {
            let account = provisioner.resolve_service_account(&request.model_uuid, application)?;
            let has_foundation = FOUNDATION_ROLES.iter().all(|r| managed.roles.contains(*r));
            if !account.created && !has_foundation {
                debug!(application, "ensuring foundation roles on existing account");
                provisioner.grant_foundation_roles(&account.email)?;
            }
            managed.service_account = Some(account.email.clone());
            managed
                .roles
                .extend(FOUNDATION_ROLES.iter().map(|r| r.to_string()));
            store.put_managed_entities(application, &managed)?;
            Some(account.email)
        } else {
            None
        };

        if !request.has_credentials
            && let Some(email) = email.as_deref()
        {
            let material = provisioner.issue_key(request, email)?;
            self.source
                .attach_credentials(&request.relation_id, &material)?;
        }

        if !request.instance_labels.is_empty() {
            provisioner.apply_labels(&request.instance, &request.zone, &request.instance_labels)?;
        }

        if let Some(email) = email.as_deref() {
            for capability in request.capabilities.requested() {
                let grant = provisioner.enable_capability(request, capability, email)?;
                managed.roles.extend(grant.roles);
                managed.custom_roles.extend(grant.custom_roles);
                store.put_managed_entities(application, &managed)?;
            }
        }
        Ok(())
    }

    fn acknowledge(&mut self, completed: &[RelationId]) -> ReconcileResult<()> {
        if completed.is_empty() {
            return Ok(());
        }
        self.source.mark_completed(completed)?;
        debug!(count = completed.len(), "acknowledged requests");
        Ok(())
    }

    fn advance(&mut self, event: Event) {
        let next = self.state.next(&event);
        if next != self.state {
            debug!(from = %self.state, to = %next, ?event, "state transition");
        }
        self.state = next;
    }
}
