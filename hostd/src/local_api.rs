use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tether_protocol::Project;

use crate::rpc;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub cwd: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct SnapshotDiffQuery {
    pub project_id: String,
    pub hash: String,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(rpc::status_value(&state).await)
}

async fn list_projects(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "projects": state.projects.list().await }))
}

async fn register_project(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Project>, (StatusCode, String)> {
    state
        .projects
        .register(&req.cwd, req.name.as_deref())
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

async fn unregister_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    Json(json!({ "removed": state.projects.unregister(&id).await }))
}

async fn snapshot_diff(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotDiffQuery>,
) -> Result<String, (StatusCode, String)> {
    let Some(project) = state.projects.get(&query.project_id).await else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("unknown project: {}", query.project_id),
        ));
    };
    Ok(state.snapshots.diff(&project, &query.hash).await)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/projects", get(list_projects).post(register_project))
        .route("/projects/:id", delete(unregister_project))
        .route("/snapshot/diff", get(snapshot_diff))
        .with_state(state)
}

pub async fn serve_unix(sock_path: PathBuf, app: Router) -> anyhow::Result<()> {
    use hyper::server::conn::http1;
    use hyper_util::{rt::TokioIo, service::TowerToHyperService};

    // Ensure the parent directory exists; otherwise the bind fails and local
    // clients wait forever for a socket that never appears.
    if let Some(parent) = sock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&sock_path);
    let listener = tokio::net::UnixListener::bind(&sock_path)?;
    loop {
        let (stream, _) = listener.accept().await?;
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let _ = http1::Builder::new().serve_connection(io, service).await;
        });
    }
}
