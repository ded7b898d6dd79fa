use std::path::Path;

use iambroker_reconciler::BrokerState;
use tracing::info;

use super::{Overrides, build_reconciler, load_config};

/// One pass. Fails when the broker ends up blocked.
pub fn reconcile(config_path: &Path, overrides: &Overrides) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let mut reconciler = build_reconciler(&config)?;

    match reconciler.tick() {
        BrokerState::CredentialsMissing => anyhow::bail!("no usable credentials"),
        BrokerState::Blocked { reason } => anyhow::bail!("reconciliation blocked: {reason}"),
        state => {
            info!(state = %state, "reconcile finished");
            Ok(())
        }
    }
}

pub fn cleanup(config_path: &Path, overrides: &Overrides) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let mut reconciler = build_reconciler(&config)?;

    if !reconciler.ensure_credentials() {
        anyhow::bail!("no usable credentials");
    }
    let revoked = reconciler.sweep()?;
    for relation in &revoked {
        println!("revoked key for {relation}");
    }
    info!(count = revoked.len(), "cleanup finished");
    Ok(())
}
