//! Process-wide reconciler context.

use std::path::PathBuf;

use iambroker_state::StateStore;

use crate::error::{ReconcileError, ReconcileResult};

/// Everything a reconciliation pass needs besides its collaborators.
///
/// Built once per process and passed by reference.
pub struct ReconcilerContext {
    /// Model (cluster) this broker serves.
    pub model_uuid: String,
    /// Where activated service-account key material is kept (mode 0600).
    pub credentials_path: PathBuf,
    pub store: StateStore,
    project: Option<String>,
}

impl ReconcilerContext {
    /// Create a context, picking up the project recorded by an earlier activation.
    pub fn new(
        model_uuid: impl Into<String>,
        credentials_path: impl Into<PathBuf>,
        store: StateStore,
    ) -> ReconcileResult<Self> {
        let project = store.project()?;
        Ok(Self {
            model_uuid: model_uuid.into(),
            credentials_path: credentials_path.into(),
            store,
            project,
        })
    }

    /// Project of the active credentials.
    pub fn project(&self) -> ReconcileResult<&str> {
        self.project.as_deref().ok_or(ReconcileError::NoProject)
    }

    pub fn set_project(&mut self, project: &str) -> ReconcileResult<()> {
        self.store.set_project(project)?;
        self.project = Some(project.to_string());
        Ok(())
    }
}
