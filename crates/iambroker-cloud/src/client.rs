//! Cloud IAM call primitive and the `gcloud` CLI backend.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{CloudError, CloudResult};

/// Issues calls against the cloud provider.
///
/// A call is addressed as `<group> <subgroup> [args...]`, e.g.
/// `iam service-accounts list` or `compute instances describe NAME --zone Z`.
pub trait CloudIam: Send + Sync {
    /// Run a call and return its structured output (`Value::Null` when empty).
    fn invoke(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<Value>;

    /// Run a call whose only success signal is the unstructured text on stderr.
    fn invoke_stderr(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<String>;
}

impl<T: CloudIam + ?Sized> CloudIam for Arc<T> {
    fn invoke(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<Value> {
        (**self).invoke(group, subgroup, args)
    }

    fn invoke_stderr(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<String> {
        (**self).invoke_stderr(group, subgroup, args)
    }
}

impl<T: CloudIam + ?Sized> CloudIam for Box<T> {
    fn invoke(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<Value> {
        (**self).invoke(group, subgroup, args)
    }

    fn invoke_stderr(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<String> {
        (**self).invoke_stderr(group, subgroup, args)
    }
}

/// `gcloud`-compatible command-line backend.
///
/// Runs `<program> --quiet --format=json <group> <subgroup> args...`. A
/// non-zero exit surfaces stderr as a classified [`CloudError`].
#[derive(Debug, Clone)]
pub struct GcloudCli {
    program: String,
    config_dir: Option<PathBuf>,
}

impl GcloudCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            config_dir: None,
        }
    }

    /// Keep the CLI's auth and config state in `dir` instead of `$HOME`.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    fn command_line(&self, group: &str, subgroup: &str, args: &[&str]) -> Vec<String> {
        let mut argv = vec![
            "--quiet".to_string(),
            "--format=json".to_string(),
            group.to_string(),
            subgroup.to_string(),
        ];
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    /// Run the CLI and return (stdout, stderr), both trimmed.
    fn run(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<(String, String)> {
        let argv = self.command_line(group, subgroup, args);
        debug!(program = %self.program, %group, %subgroup, "invoking cloud cli");

        let mut cmd = Command::new(&self.program);
        cmd.args(&argv);
        if let Some(dir) = &self.config_dir {
            cmd.env("CLOUDSDK_CONFIG", dir);
        }

        let output = cmd.output().map_err(|source| CloudError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            debug!(%group, %subgroup, exit_code, "cloud cli call failed");
            return Err(CloudError::from_message(stderr));
        }
        Ok((stdout, stderr))
    }
}

impl CloudIam for GcloudCli {
    fn invoke(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<Value> {
        let (stdout, _) = self.run(group, subgroup, args)?;
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout).map_err(|source| CloudError::Decode {
            command: format!("{group} {subgroup}"),
            source,
        })
    }

    fn invoke_stderr(&self, group: &str, subgroup: &str, args: &[&str]) -> CloudResult<String> {
        let (_, stderr) = self.run(group, subgroup, args)?;
        Ok(stderr)
    }
}
