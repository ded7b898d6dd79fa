//! Obtaining and activating the broker's own cloud credentials.
//!
//! Key material comes from the platform trust hook when it is installed and
//! permitted, and from operator-supplied base64 configuration otherwise.
//! Activation writes the material to the credentials file (mode 0600),
//! records the project it belongs to, and hands the file to the cloud CLI.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::Command;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use iambroker_cloud::CloudIam;
use iambroker_core::config::CredentialsSection;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::ReconcilerContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::ports::CredentialProvider;

/// Why credentials could not be obtained.
///
/// The display strings double as the blocked status shown to operators.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("missing credentials; set credentials config")]
    NotConfigured,

    #[error("missing credentials access; grant with: juju trust")]
    AccessDenied,

    #[error("invalid value for credentials config")]
    Invalid { reason: String },

    #[error("credential hook failed: {0}")]
    Hook(String),

    #[error("failed to read credentials: {0}")]
    Io(#[from] io::Error),
}

/// Asks the platform trust hook (`credential-get --format=json`).
#[derive(Debug, Clone)]
pub struct TrustHookProvider {
    command: String,
}

impl TrustHookProvider {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl CredentialProvider for TrustHookProvider {
    fn get(&self) -> Result<String, CredentialError> {
        let output = match Command::new(&self.command).arg("--format=json").output() {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(command = %self.command, "trust hook not installed");
                return Err(CredentialError::NotConfigured);
            }
            Err(e) => return Err(CredentialError::Io(e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_ascii_lowercase().contains("permission denied") {
                return Err(CredentialError::AccessDenied);
            }
            return Err(CredentialError::Hook(stderr.trim().to_string()));
        }

        let value: Value =
            serde_json::from_slice(&output.stdout).map_err(|e| CredentialError::Invalid {
                reason: format!("trust hook output: {e}"),
            })?;
        value
            .pointer("/credential/attributes/file")
            .and_then(Value::as_str)
            .filter(|file| !file.is_empty())
            .map(str::to_string)
            .ok_or(CredentialError::NotConfigured)
    }
}

/// Decodes the operator's base64 `credentials` setting.
#[derive(Debug, Clone, Default)]
pub struct ConfigProvider {
    encoded: Option<String>,
}

impl ConfigProvider {
    pub fn new(encoded: Option<String>) -> Self {
        Self { encoded }
    }
}

impl CredentialProvider for ConfigProvider {
    fn get(&self) -> Result<String, CredentialError> {
        let encoded = self
            .encoded
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(CredentialError::NotConfigured)?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CredentialError::Invalid {
                reason: e.to_string(),
            })?;
        String::from_utf8(bytes).map_err(|e| CredentialError::Invalid {
            reason: e.to_string(),
        })
    }
}

/// Tries providers in order.
///
/// A provider answering [`CredentialError::NotConfigured`] or
/// [`CredentialError::AccessDenied`] passes to the next one. If none
/// succeeds, a denial is reported in preference to "not configured" so the
/// operator learns that granting access would help.
pub struct ChainProvider {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl ChainProvider {
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Trust hook first (when configured), then base64 config.
    pub fn from_config(section: &CredentialsSection) -> Self {
        let mut providers: Vec<Box<dyn CredentialProvider>> = Vec::new();
        if let Some(command) = section.trust_command.as_deref().filter(|c| !c.is_empty()) {
            providers.push(Box::new(TrustHookProvider::new(command)));
        }
        providers.push(Box::new(ConfigProvider::new(section.base64.clone())));
        Self::new(providers)
    }
}

impl CredentialProvider for ChainProvider {
    fn get(&self) -> Result<String, CredentialError> {
        let mut denied = false;
        for provider in &self.providers {
            match provider.get() {
                Ok(material) => return Ok(material),
                Err(CredentialError::NotConfigured) => {}
                Err(CredentialError::AccessDenied) => denied = true,
                Err(e) => return Err(e),
            }
        }
        if denied {
            Err(CredentialError::AccessDenied)
        } else {
            Err(CredentialError::NotConfigured)
        }
    }
}

/// Obtain, persist and activate credentials. Returns the project id.
pub fn activate(
    ctx: &mut ReconcilerContext,
    cloud: &dyn CloudIam,
    provider: &dyn CredentialProvider,
) -> ReconcileResult<String> {
    let material = provider.get()?;
    let project = project_id(&material)?;

    write_private(&ctx.credentials_path, material.as_bytes())?;
    let key_file = ctx.credentials_path.to_string_lossy().into_owned();
    cloud.invoke("auth", "activate-service-account", &["--key-file", key_file.as_str()])?;
    ctx.set_project(&project)?;

    info!(project = %project, key_file = %key_file, "credentials activated");
    Ok(project)
}

fn project_id(material: &str) -> Result<String, CredentialError> {
    let value: Value = serde_json::from_str(material).map_err(|e| CredentialError::Invalid {
        reason: format!("key is not JSON: {e}"),
    })?;
    value
        .get("project_id")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CredentialError::Invalid {
            reason: "key has no project_id".to_string(),
        })
}

/// Replace `path` atomically with `content`, readable by the owner only.
fn write_private(path: &Path, content: &[u8]) -> ReconcileResult<()> {
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| {
        warn!(path = %path.display(), error = %e, "failed to replace credentials file");
        ReconcileError::Io(e.error)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iambroker_cloud::fake::FakeCloud;
    use iambroker_state::StateStore;
    use std::sync::{Mutex, MutexGuard};

    // Hook tests write and exec scripts; serialize them to avoid ETXTBSY.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(|e| e.into_inner())
    }

    struct Fixed(fn() -> Result<String, CredentialError>);

    impl CredentialProvider for Fixed {
        fn get(&self) -> Result<String, CredentialError> {
            (self.0)()
        }
    }

    fn key_json() -> String {
        r#"{"type":"service_account","project_id":"proj-1","client_email":"a@b"}"#.to_string()
    }

    #[test]
    fn config_provider_decodes_base64() {
        let provider = ConfigProvider::new(Some(STANDARD.encode(key_json())));
        assert_eq!(provider.get().unwrap(), key_json());
    }

    #[test]
    fn config_provider_unset_or_blank_is_not_configured() {
        for encoded in [None, Some(String::new()), Some("   ".to_string())] {
            let err = ConfigProvider::new(encoded).get().unwrap_err();
            assert!(matches!(err, CredentialError::NotConfigured));
        }
    }

    #[test]
    fn config_provider_rejects_garbage() {
        let err = ConfigProvider::new(Some("!!not base64!!".into()))
            .get()
            .unwrap_err();
        assert!(matches!(err, CredentialError::Invalid { .. }));
        assert_eq!(err.to_string(), "invalid value for credentials config");
    }

    #[test]
    fn chain_prefers_first_success() {
        let chain = ChainProvider::new(vec![
            Box::new(Fixed(|| Err(CredentialError::NotConfigured))),
            Box::new(Fixed(|| Ok("second".to_string()))),
        ]);
        assert_eq!(chain.get().unwrap(), "second");
    }

    #[test]
    fn chain_reports_denial_over_missing_config() {
        let chain = ChainProvider::new(vec![
            Box::new(Fixed(|| Err(CredentialError::AccessDenied))),
            Box::new(Fixed(|| Err(CredentialError::NotConfigured))),
        ]);
        let err = chain.get().unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing credentials access; grant with: juju trust"
        );
    }

    #[test]
    fn chain_falls_back_to_config_when_denied() {
        let chain = ChainProvider::new(vec![
            Box::new(Fixed(|| Err(CredentialError::AccessDenied))),
            Box::new(Fixed(|| Ok("from-config".to_string()))),
        ]);
        assert_eq!(chain.get().unwrap(), "from-config");
    }

    #[test]
    fn chain_stops_on_invalid_config() {
        let chain = ChainProvider::new(vec![
            Box::new(Fixed(|| Err(CredentialError::Invalid { reason: "x".into() }))),
            Box::new(Fixed(|| Ok("never".to_string()))),
        ]);
        assert!(matches!(chain.get(), Err(CredentialError::Invalid { .. })));
    }

    #[test]
    fn missing_trust_hook_is_not_configured() {
        let _guard = serial();
        let provider = TrustHookProvider::new("/nonexistent/iambroker-credential-get");
        assert!(matches!(provider.get(), Err(CredentialError::NotConfigured)));
    }

    #[test]
    fn from_config_skips_empty_trust_command() {
        let section = CredentialsSection {
            trust_command: Some(String::new()),
            base64: Some(STANDARD.encode("material")),
        };
        assert_eq!(ChainProvider::from_config(&section).get().unwrap(), "material");
    }

    #[test]
    fn activation_writes_private_file_and_records_project() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("creds.json");
        let store = StateStore::open_in_memory().unwrap();
        let mut ctx = ReconcilerContext::new("model", &path, store.clone()).unwrap();
        let cloud = FakeCloud::new("proj-1");
        let provider = ConfigProvider::new(Some(STANDARD.encode(key_json())));

        let project = activate(&mut ctx, &cloud, &provider).unwrap();

        assert_eq!(project, "proj-1");
        assert_eq!(ctx.project().unwrap(), "proj-1");
        assert_eq!(store.project().unwrap().as_deref(), Some("proj-1"));
        assert_eq!(fs::read_to_string(&path).unwrap(), key_json());
        assert_eq!(
            cloud.activated_key_files(),
            vec![path.to_string_lossy().into_owned()]
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn activation_rejects_key_without_project() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let mut ctx = ReconcilerContext::new("model", dir.path().join("c.json"), store).unwrap();
        let cloud = FakeCloud::new("proj-1");
        let provider = ConfigProvider::new(Some(STANDARD.encode(r#"{"type":"x"}"#)));

        let err = activate(&mut ctx, &cloud, &provider).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Credentials(CredentialError::Invalid { .. })
        ));
        assert!(cloud.activated_key_files().is_empty());
        assert!(!dir.path().join("c.json").exists());
    }

    #[cfg(unix)]
    #[test]
    fn trust_hook_reads_file_attribute_and_detects_denial() {
        use std::os::unix::fs::PermissionsExt;

        let _guard = serial();
        let dir = tempfile::tempdir().unwrap();
        let write_hook = |name: &str, body: &str| {
            let path = dir.path().join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        };

        let ok = write_hook(
            "ok-hook",
            r#"echo '{"credential":{"attributes":{"file":"{\"project_id\":\"p\"}"}}}'"#,
        );
        let denied = write_hook("denied-hook", "echo 'ERROR permission denied' >&2; exit 1");

        assert_eq!(
            TrustHookProvider::new(ok).get().unwrap(),
            r#"{"project_id":"p"}"#
        );
        assert!(matches!(
            TrustHookProvider::new(denied).get(),
            Err(CredentialError::AccessDenied)
        ));
    }
}
