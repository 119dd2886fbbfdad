//! Checkpoint / recovery
//!
//! Byte-exact snapshots of the Editor's allowed-file set, one per phase of
//! a Movement, stored under `<state_dir>/checkpoints/<symphony>/<phase>/`.
//! Restore writes each captured file back atomically: sibling tempfile,
//! fsync, rename. A failure mid-restore leaves already-restored files
//! restored and reports the first failure.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{MaestroError, Result};

/// Identifies one saved checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointId {
    pub symphony_id: String,
    pub phase: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    /// Workspace-relative paths captured, in capture order. Files that did
    /// not exist at save time are recorded as absent and deleted on restore.
    files: BTreeMap<String, bool>,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Stores and restores file-byte snapshots.
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| MaestroError::Config(format!("cannot create checkpoint dir: {}", e)))?;
        Ok(Self { root })
    }

    fn dir_for(&self, id: &CheckpointId) -> PathBuf {
        self.root.join(&id.symphony_id).join(id.phase.to_string())
    }

    /// Capture the exact bytes of `files` (workspace-relative paths under
    /// `cwd`). Missing files are recorded so restore can delete them.
    pub fn save(
        &self,
        symphony_id: &str,
        phase: usize,
        files: &[String],
        cwd: &Path,
    ) -> Result<CheckpointId> {
        let id = CheckpointId {
            symphony_id: symphony_id.to_string(),
            phase,
        };
        let dir = self.dir_for(&id);
        fs::create_dir_all(&dir)
            .map_err(|e| MaestroError::Config(format!("cannot create checkpoint: {}", e)))?;

        let mut manifest = Manifest {
            files: BTreeMap::new(),
            created_at: chrono::Utc::now(),
        };

        for rel in files {
            let source = cwd.join(rel);
            let existed = source.exists();
            manifest.files.insert(rel.clone(), existed);
            if existed {
                let target = dir.join(rel);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| MaestroError::Config(e.to_string()))?;
                }
                fs::copy(&source, &target).map_err(|e| {
                    MaestroError::Config(format!("cannot capture {}: {}", rel, e))
                })?;
            }
            debug!(file = %rel, existed, "captured");
        }

        let manifest_json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| MaestroError::Config(e.to_string()))?;
        fs::write(dir.join("manifest.json"), manifest_json)
            .map_err(|e| MaestroError::Config(e.to_string()))?;

        Ok(id)
    }

    /// Write every captured file back. Each file is restored atomically;
    /// the first failure is reported after the remaining files have been
    /// attempted, so no file is left half-written.
    pub fn restore(&self, id: &CheckpointId, cwd: &Path) -> Result<()> {
        let dir = self.dir_for(id);
        let manifest_json = fs::read_to_string(dir.join("manifest.json"))
            .map_err(|e| MaestroError::Config(format!("checkpoint manifest missing: {}", e)))?;
        let manifest: Manifest = serde_json::from_str(&manifest_json)
            .map_err(|e| MaestroError::Config(format!("checkpoint manifest corrupt: {}", e)))?;

        let mut first_failure: Option<MaestroError> = None;

        for (rel, existed) in &manifest.files {
            let target = cwd.join(rel);
            let result = if *existed {
                restore_one(&dir.join(rel), &target)
            } else if target.exists() {
                // The file did not exist at save time; remove what the
                // failed attempt created.
                fs::remove_file(&target)
                    .map_err(|e| MaestroError::Config(format!("cannot remove {}: {}", rel, e)))
            } else {
                Ok(())
            };
            if let Err(e) = result {
                warn!(file = %rel, error = %e, "restore failed");
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Atomic single-file restore: write the captured bytes to a sibling
/// tempfile, fsync, then rename over the target.
fn restore_one(captured: &Path, target: &Path) -> Result<()> {
    let bytes = fs::read(captured)
        .map_err(|e| MaestroError::Config(format!("cannot read capture {:?}: {}", captured, e)))?;

    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).map_err(|e| MaestroError::Config(e.to_string()))?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)
        .map_err(|e| MaestroError::Config(format!("cannot create tempfile: {}", e)))?;
    temp.write_all(&bytes)
        .map_err(|e| MaestroError::Config(format!("cannot write tempfile: {}", e)))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| MaestroError::Config(format!("cannot fsync tempfile: {}", e)))?;
    temp.persist(target)
        .map_err(|e| MaestroError::Config(format!("cannot rename into place: {}", e)))?;
    Ok(())
}
