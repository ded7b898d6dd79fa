//! Request source backed by a JSON file.
//!
//! ```json
//! {
//!   "relations": [
//!     {
//!       "relation-id": "gcp:3",
//!       "unit-name": "kubernetes-worker/0",
//!       "application-name": "kubernetes-worker",
//!       "model-uuid": "…",
//!       "instance": "juju-0f1e2d-0",
//!       "zone": "us-east1-b",
//!       "capabilities": { "instance-inspection": true },
//!       "completed": false
//!     }
//!   ]
//! }
//! ```
//!
//! The broker rewrites the file when it attaches credentials or
//! acknowledges requests. A missing file means no relations.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use iambroker_core::{CapabilityRequest, RelationId};
use iambroker_reconciler::{RequestSource, SourceError};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelationEntry {
    #[serde(flatten)]
    request: CapabilityRequest,
    #[serde(default)]
    completed: bool,
    /// Key material handed to the relation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RequestsFile {
    #[serde(default)]
    relations: Vec<RelationEntry>,
}

pub struct FileRequestSource {
    path: PathBuf,
}

impl FileRequestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<RequestsFile, SourceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RequestsFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, file: &RequestsFile) -> Result<(), SourceError> {
        let dir = self
            .path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        serde_json::to_writer_pretty(&mut tmp, file)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path).map_err(|e| SourceError::Io(e.error))?;
        debug!(path = %self.path.display(), "request file updated");
        Ok(())
    }
}

impl RequestSource for FileRequestSource {
    fn requests(&mut self) -> Result<Vec<CapabilityRequest>, SourceError> {
        Ok(self
            .load()?
            .relations
            .into_iter()
            .filter(|entry| !entry.completed)
            .map(|entry| entry.request)
            .collect())
    }

    fn relation_ids(&mut self) -> Result<BTreeSet<RelationId>, SourceError> {
        Ok(self
            .load()?
            .relations
            .into_iter()
            .map(|entry| entry.request.relation_id)
            .collect())
    }

    fn attach_credentials(&mut self, relation_id: &str, material: &str) -> Result<(), SourceError> {
        let mut file = self.load()?;
        let entry = file
            .relations
            .iter_mut()
            .find(|entry| entry.request.relation_id == relation_id)
            .ok_or_else(|| SourceError::UnknownRelation(relation_id.to_string()))?;
        entry.credentials = Some(material.to_string());
        entry.request.has_credentials = true;
        self.save(&file)
    }

    fn mark_completed(&mut self, relation_ids: &[RelationId]) -> Result<(), SourceError> {
        let mut file = self.load()?;
        for entry in &mut file.relations {
            if relation_ids.contains(&entry.request.relation_id) {
                entry.completed = true;
            }
        }
        self.save(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "relations": [
        {
          "relation-id": "gcp:1",
          "unit-name": "kubernetes-worker/0",
          "application-name": "kubernetes-worker",
          "model-uuid": "m",
          "instance": "vm-0",
          "zone": "us-east1-b",
          "capabilities": { "dns-management": true }
        },
        {
          "relation-id": "gcp:2",
          "unit-name": "etcd/0",
          "application-name": "etcd",
          "model-uuid": "m",
          "instance": "vm-1",
          "zone": "us-east1-b",
          "completed": true,
          "has-credentials": true
        }
      ]
    }"#;

    fn sample() -> (tempfile::TempDir, FileRequestSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        fs::write(&path, SAMPLE).unwrap();
        (dir, FileRequestSource::new(path))
    }

    #[test]
    fn missing_file_has_no_relations() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileRequestSource::new(dir.path().join("absent.json"));
        assert!(source.requests().unwrap().is_empty());
        assert!(source.relation_ids().unwrap().is_empty());
    }

    #[test]
    fn pending_excludes_completed() {
        let (_dir, mut source) = sample();
        let pending = source.requests().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].relation_id, "gcp:1");
        assert!(pending[0].capabilities.dns_management);

        let all = source.relation_ids().unwrap();
        assert_eq!(all, BTreeSet::from(["gcp:1".to_string(), "gcp:2".to_string()]));
    }

    #[test]
    fn attach_and_acknowledge_rewrite_the_file() {
        let (_dir, mut source) = sample();
        source.attach_credentials("gcp:1", "{\"k\":1}").unwrap();
        source.mark_completed(&["gcp:1".to_string()]).unwrap();

        assert!(source.requests().unwrap().is_empty());
        let file = source.load().unwrap();
        let entry = &file.relations[0];
        assert!(entry.completed);
        assert!(entry.request.has_credentials);
        assert_eq!(entry.credentials.as_deref(), Some("{\"k\":1}"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&source.path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn unknown_relation_is_rejected() {
        let (_dir, mut source) = sample();
        let err = source.attach_credentials("gcp:9", "x").unwrap_err();
        assert!(matches!(err, SourceError::UnknownRelation(id) if id == "gcp:9"));
    }

    #[test]
    fn malformed_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        fs::write(&path, "{ not json").unwrap();
        let mut source = FileRequestSource::new(path);
        assert!(matches!(source.requests(), Err(SourceError::Decode(_))));
    }
}
