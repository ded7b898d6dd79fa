use std::fs;
use std::path::Path;

use iambroker_core::BrokerConfig;

/// Print or write a broker.toml scaffold.
pub fn init(model_uuid: &str, output: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let rendered = render(model_uuid)?;
    match output {
        None => print!("{rendered}"),
        Some(path) => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            fs::write(path, rendered)?;
            println!("✓ Wrote {}", path.display());
        }
    }
    Ok(())
}

fn render(model_uuid: &str) -> anyhow::Result<String> {
    let model_uuid = model_uuid.trim();
    if model_uuid.is_empty() {
        anyhow::bail!("--model-uuid must not be empty");
    }
    Ok(BrokerConfig::scaffold(model_uuid).to_toml_string()?)
}
