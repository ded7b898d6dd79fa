use std::path::Path;

use iambroker_state::StateStore;
use serde_json::json;

use super::{Overrides, load_config, open_store};

pub fn show(config_path: &Path, overrides: &Overrides) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let store = open_store(&config)?;
    println!("{}", serde_json::to_string_pretty(&snapshot(&store)?)?);
    Ok(())
}

/// Everything the broker has recorded, as one JSON document.
fn snapshot(store: &StateStore) -> anyhow::Result<serde_json::Value> {
    Ok(json!({
        "project": store.project()?,
        "service_accounts": store.service_accounts()?,
        "account_keys": store.account_keys()?,
        "managed": store.all_managed_entities()?,
    }))
}
