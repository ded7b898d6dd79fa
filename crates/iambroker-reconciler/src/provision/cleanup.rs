use std::collections::BTreeSet;

use iambroker_core::RelationId;
use tracing::{info, warn};

use super::Provisioner;
use crate::error::ReconcileResult;

impl Provisioner<'_> {
    /// Revoke keys held for relations that are no longer live.
    ///
    /// Registry entries are removed only for keys whose deletion succeeded,
    /// so an interrupted sweep resumes where it stopped.
    pub fn sweep_stale_keys(&self, live: &BTreeSet<RelationId>) -> ReconcileResult<Vec<RelationId>> {
        let registry = self.ctx.store.account_keys()?;
        let mut revoked = Vec::new();
        let mut failure = None;

        for (relation_id, key) in registry.iter().filter(|(id, _)| !live.contains(*id)) {
            if let Err(e) = self.delete_key(key) {
                warn!(relation = %relation_id, key = %key.id, error = %e, "failed to revoke stale key");
                failure = Some(e);
                break;
            }
            revoked.push(relation_id.clone());
        }

        if !revoked.is_empty() {
            self.ctx.store.remove_account_keys(&revoked)?;
            info!(count = revoked.len(), "revoked keys of departed relations");
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(revoked),
        }
    }
}
