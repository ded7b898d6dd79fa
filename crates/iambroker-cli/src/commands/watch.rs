use std::path::{Path, PathBuf};

use iambroker_core::BrokerConfig;
use iambroker_reconciler::ChainProvider;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{Overrides, build_reconciler, credentials_fingerprint, load_config};

/// Tick every poll interval until Ctrl-C.
pub async fn watch(config_path: PathBuf, overrides: Overrides) -> anyhow::Result<()> {
    let config = load_config(&config_path, &overrides)?;
    let interval = config.requests.poll_interval();
    let mut fingerprint = credentials_fingerprint(&config.credentials);
    let mut reconciler = build_reconciler(&config)?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    info!(
        interval_secs = interval.as_secs(),
        requests = %config.requests.path.display(),
        "broker watching for requests"
    );

    loop {
        if let Some(fresh) = reload_credentials(&config_path, &overrides, &fingerprint) {
            fingerprint = credentials_fingerprint(&fresh.credentials);
            reconciler.credentials_changed(Box::new(ChainProvider::from_config(&fresh.credentials)));
        }

        let (returned, state) = tokio::task::spawn_blocking(move || {
            let state = reconciler.tick().clone();
            (reconciler, state)
        })
        .await?;
        reconciler = returned;
        debug!(state = %state, "tick finished");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {
                info!("broker shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Re-read the config; returns it when the credentials settings changed.
fn reload_credentials(
    config_path: &Path,
    overrides: &Overrides,
    fingerprint: &str,
) -> Option<BrokerConfig> {
    match load_config(config_path, overrides) {
        Ok(fresh) if credentials_fingerprint(&fresh.credentials) != fingerprint => Some(fresh),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "config reload failed, keeping current credentials");
            None
        }
    }
}
