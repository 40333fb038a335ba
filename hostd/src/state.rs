use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use tether_protocol::redaction::Redactor;

use crate::config::Config;
use crate::projects::ProjectRegistry;
use crate::snapshot::SnapshotStore;

/// Everything handlers share. Owned behind one Arc; no module-level mutable
/// singletons.
pub struct AppState {
    pub cfg: Config,
    pub projects: ProjectRegistry,
    pub snapshots: SnapshotStore,
    pub redactor: Arc<Redactor>,
    pub connected: AtomicBool,
    pub started_at: Instant,
    pub started_wall: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(cfg: Config, redactor: Arc<Redactor>) -> Self {
        let projects = ProjectRegistry::load(cfg.data_root.join("projects.json"));
        let snapshots = SnapshotStore::new(&cfg.data_root);
        Self {
            cfg,
            projects,
            snapshots,
            redactor,
            connected: AtomicBool::new(false),
            started_at: Instant::now(),
            started_wall: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
pub fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
    use std::path::PathBuf;

    let data = tempfile::tempdir().unwrap();
    let cfg = Config {
        server_url: "ws://127.0.0.1:0".into(),
        host_id: "host-test".into(),
        data_root: data.path().to_path_buf(),
        local_socket: data.path().join("tetherd.sock"),
        token_path: PathBuf::from(data.path().join("token")),
        redaction_extra_regex: Vec::new(),
    };
    let state = Arc::new(AppState::new(
        cfg,
        Arc::new(Redactor::new(&[]).expect("default redactor")),
    ));
    (state, data)
}
