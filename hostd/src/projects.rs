use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tether_protocol::Project;
use tokio::sync::RwLock;

use crate::errors::ToolError;

/// In-memory project map persisted to a JSON file under the data root. The
/// file is rewritten atomically on every mutation; a corrupt or missing file
/// just means an empty registry.
pub struct ProjectRegistry {
    path: PathBuf,
    inner: RwLock<HashMap<String, Project>>,
}

impl ProjectRegistry {
    pub fn load(path: PathBuf) -> Self {
        let map = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<Project>>(&raw) {
                Ok(list) => list.into_iter().map(|p| (p.id.clone(), p)).collect(),
                Err(err) => {
                    tracing::warn!(error=%err, path=%path.display(), "project registry unreadable; starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            inner: RwLock::new(map),
        }
    }

    pub async fn register(&self, cwd: &str, name: Option<&str>) -> Result<Project, ToolError> {
        let canonical = std::fs::canonicalize(cwd)
            .map_err(|e| ToolError::validation(format!("bad project cwd: {e}")))?;
        if !canonical.is_dir() {
            return Err(ToolError::validation("project cwd is not a directory"));
        }
        let cwd = canonical.to_string_lossy().to_string();

        let mut inner = self.inner.write().await;
        // Re-registering a cwd reactivates the existing entry instead of
        // minting a second id for the same directory.
        if let Some(existing) = inner.values_mut().find(|p| p.cwd == cwd) {
            existing.active = true;
            if let Some(name) = name {
                existing.name = name.to_string();
            }
            let project = existing.clone();
            self.persist(&inner);
            return Ok(project);
        }

        let name = name
            .map(|s| s.to_string())
            .or_else(|| {
                Path::new(&cwd)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "project".to_string());
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            cwd,
            name,
            active: true,
        };
        inner.insert(project.id.clone(), project.clone());
        self.persist(&inner);
        Ok(project)
    }

    pub async fn unregister(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.remove(id).is_some();
        if removed {
            self.persist(&inner);
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Project> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.inner.read().await.values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        projects
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    fn persist(&self, inner: &HashMap<String, Project>) {
        let mut list: Vec<&Project> = inner.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        let json = match serde_json::to_string_pretty(&list) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error=%err, "failed to encode project registry");
                return;
            }
        };
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let write = tempfile::NamedTempFile::new_in(&parent)
            .and_then(|tmp| {
                std::fs::write(tmp.path(), &json)?;
                tmp.persist(&self.path).map_err(|e| e.error)
            })
            .map(|_| ());
        if let Err(err) = write {
            tracing::warn!(error=%err, path=%self.path.display(), "failed to persist project registry");
        }
    }
}
