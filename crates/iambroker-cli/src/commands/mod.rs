pub mod config;
pub mod reconcile;
pub mod state;
pub mod watch;

use std::path::{Path, PathBuf};

use anyhow::Context;
use iambroker_cloud::{GcloudCli, RetryPolicy};
use iambroker_core::BrokerConfig;
use iambroker_core::config::CredentialsSection;
use iambroker_reconciler::{ChainProvider, Reconciler, ReconcilerContext};
use iambroker_state::StateStore;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::source::FileRequestSource;
use crate::status::LogStatusSink;

/// Command-line settings that take precedence over broker.toml.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub state_dir: Option<PathBuf>,
    pub requests: Option<PathBuf>,
}

pub fn load_config(path: &Path, overrides: &Overrides) -> anyhow::Result<BrokerConfig> {
    let mut config = BrokerConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(dir) = &overrides.state_dir {
        config.broker.state_dir = dir.clone();
    }
    if let Some(requests) = &overrides.requests {
        config.requests.path = requests.clone();
    }
    Ok(config)
}

pub fn open_store(config: &BrokerConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.broker.state_dir)
        .with_context(|| format!("creating {}", config.broker.state_dir.display()))?;
    let db_path = config.state_db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

/// Assemble a reconciler from configuration.
pub fn build_reconciler(config: &BrokerConfig) -> anyhow::Result<Reconciler> {
    let store = open_store(config)?;
    let ctx = ReconcilerContext::new(
        config.broker.model_uuid.clone(),
        config.broker.credentials_file.clone(),
        store,
    )?;
    let cloud = GcloudCli::new(config.cloud.cli.clone())
        .with_config_dir(config.broker.state_dir.join("gcloud"));

    let reconciler = Reconciler::new(
        ctx,
        Box::new(cloud),
        Box::new(FileRequestSource::new(config.requests.path.clone())),
        Box::new(LogStatusSink::new(config.broker.status_file.clone())),
        Box::new(ChainProvider::from_config(&config.credentials)),
    )
    .with_retry(RetryPolicy::new(config.retry.attempts, config.retry.step()));
    Ok(reconciler)
}

/// Digest of the credentials settings, used to notice when they change.
pub fn credentials_fingerprint(section: &CredentialsSection) -> String {
    let mut hasher = Sha256::new();
    hasher.update(section.trust_command.as_deref().unwrap_or_default());
    hasher.update([0u8]);
    hasher.update(section.base64.as_deref().unwrap_or_default());
    hex::encode(hasher.finalize())
}
