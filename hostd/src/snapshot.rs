use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tether_protocol::Project;
use tokio::process::Command;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Content-addressable checkpoints of a project's working tree, backed by a
/// shadow git dir kept under the data root — never inside the project. The
/// project directory itself is the work tree; no commits are ever created,
/// each checkpoint is an independent tree object.
///
/// Snapshots are best-effort: every failure degrades to an empty/false
/// result with a log line, because a failed checkpoint must not take down
/// the turn that requested it.
pub struct SnapshotStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SnapshotStore {
    pub fn new(data_root: &std::path::Path) -> Self {
        Self {
            root: data_root.join("snapshots"),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Capture the current working tree. Returns the tree hash, or None when
    /// any plumbing step fails.
    pub async fn track(&self, project: &Project) -> Option<String> {
        let _guard = self.lock(&project.id).await;
        self.ensure_init(project).await?;
        self.run_git(project, &["add", "-A", "--", "."]).await?;
        let hash = self.run_git(project, &["write-tree"]).await?;
        let hash = hash.trim().to_string();
        if hash.is_empty() { None } else { Some(hash) }
    }

    /// Files that differ between `base_hash` and the current working tree,
    /// plus the tree hash of the current state.
    pub async fn changed_files(
        &self,
        project: &Project,
        base_hash: &str,
    ) -> (Option<String>, Vec<String>) {
        let _guard = self.lock(&project.id).await;
        if self.ensure_init(project).await.is_none() {
            return (None, Vec::new());
        }
        if self
            .run_git(project, &["add", "-A", "--", "."])
            .await
            .is_none()
        {
            return (None, Vec::new());
        }
        let Some(current) = self.run_git(project, &["write-tree"]).await else {
            return (None, Vec::new());
        };
        let current = current.trim().to_string();
        let Some(listing) = self
            .run_git(
                project,
                &["diff-tree", "-r", "--name-only", base_hash, &current],
            )
            .await
        else {
            return (Some(current), Vec::new());
        };
        let files = listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        (Some(current), files)
    }

    /// Reset the working tree to `hash`: tracked files are materialized from
    /// the snapshot and files created since are deleted. A full revert, not
    /// a checkout.
    pub async fn restore(&self, project: &Project, hash: &str) -> bool {
        let _guard = self.lock(&project.id).await;
        if self.ensure_init(project).await.is_none() {
            return false;
        }
        if self
            .run_git(project, &["add", "-A", "--", "."])
            .await
            .is_none()
        {
            return false;
        }
        let Some(current_listing) = self.run_git(project, &["ls-files"]).await else {
            return false;
        };
        let Some(snapshot_listing) = self
            .run_git(project, &["ls-tree", "-r", "--name-only", hash])
            .await
        else {
            return false;
        };

        let snapshot_files: std::collections::HashSet<&str> = snapshot_listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        for file in current_listing.lines().map(str::trim) {
            if file.is_empty() || snapshot_files.contains(file) {
                continue;
            }
            let path = std::path::Path::new(&project.cwd).join(file);
            if let Err(err) = tokio::fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(project=%project.id, file, error=%err, "failed to remove file during restore");
                }
            }
        }

        if self.run_git(project, &["read-tree", hash]).await.is_none() {
            return false;
        }
        self.run_git(project, &["checkout-index", "-a", "-f"])
            .await
            .is_some()
    }

    /// Unified diff between the snapshot and the present working tree.
    pub async fn diff(&self, project: &Project, hash: &str) -> String {
        let _guard = self.lock(&project.id).await;
        if self.ensure_init(project).await.is_none() {
            return String::new();
        }
        if self
            .run_git(project, &["add", "-A", "--", "."])
            .await
            .is_none()
        {
            return String::new();
        }
        let Some(current) = self.run_git(project, &["write-tree"]).await else {
            return String::new();
        };
        let current = current.trim().to_string();
        self.run_git(project, &["diff", hash, &current])
            .await
            .unwrap_or_default()
    }

    /// Operations on one project's shadow store never interleave; distinct
    /// projects proceed in parallel.
    async fn lock(&self, project_id: &str) -> OwnedMutexGuard<()> {
        let cell = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        cell.lock_owned().await
    }

    fn git_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    async fn ensure_init(&self, project: &Project) -> Option<()> {
        let git_dir = self.git_dir(&project.id);
        if git_dir.join("HEAD").exists() {
            return Some(());
        }
        if let Err(err) = tokio::fs::create_dir_all(&git_dir).await {
            tracing::warn!(project=%project.id, error=%err, "failed to create shadow store dir");
            return None;
        }
        self.run_git(project, &["init", "--quiet"]).await.map(|_| ())
    }

    async fn run_git(&self, project: &Project, args: &[&str]) -> Option<String> {
        let git_dir = self.git_dir(&project.id);
        let output = Command::new("git")
            .current_dir(&project.cwd)
            .arg(format!("--git-dir={}", git_dir.display()))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                Some(String::from_utf8_lossy(&out.stdout).to_string())
            }
            Ok(out) => {
                tracing::warn!(
                    project=%project.id,
                    args=?args,
                    stderr=%String::from_utf8_lossy(&out.stderr).trim(),
                    "git invocation failed"
                );
                None
            }
            Err(err) => {
                tracing::warn!(project=%project.id, error=%err, "failed to spawn git");
                None
            }
        }
    }
}
