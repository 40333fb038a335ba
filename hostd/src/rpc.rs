use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::{Map, Value, json};
use tether_protocol::{ErrorCode, limits};

use crate::errors::ToolError;
use crate::state::AppState;
use crate::tools::walk;

/// RPC method names are stable contracts with the surrounding application;
/// renaming one here is a breaking protocol change.
pub async fn handle(
    method: &str,
    args: &Map<String, Value>,
    state: &Arc<AppState>,
) -> Result<Value, ToolError> {
    match method {
        "get_workspace_folders" => {
            let projects = state.projects.list().await;
            Ok(json!({ "folders": projects }))
        }
        "get_context" => get_context(args).await,
        "register_project" => {
            let cwd = arg_str(args, "cwd")?;
            let name = args.get("name").and_then(Value::as_str);
            let project = state.projects.register(cwd, name).await?;
            Ok(serde_json::to_value(project).map_err(|e| ToolError::internal(e.to_string()))?)
        }
        "unregister_project" => {
            let id = arg_str(args, "id")?;
            let removed = state.projects.unregister(id).await;
            Ok(json!({ "removed": removed }))
        }
        "get_project" => {
            let id = arg_str(args, "id")?;
            match state.projects.get(id).await {
                Some(project) => {
                    Ok(serde_json::to_value(project)
                        .map_err(|e| ToolError::internal(e.to_string()))?)
                }
                None => Err(ToolError::validation(format!("unknown project: {id}"))),
            }
        }
        "list_projects" => {
            let projects = state.projects.list().await;
            Ok(json!({ "projects": projects }))
        }
        "status" => Ok(status_value(state).await),
        "snapshot_track" => {
            let project = snapshot_project(args, state).await?;
            let hash = state.snapshots.track(&project).await;
            Ok(json!({ "hash": hash }))
        }
        "snapshot_patch" => {
            let project = snapshot_project(args, state).await?;
            let base = arg_str(args, "hash")?;
            let (hash, files) = state.snapshots.changed_files(&project, base).await;
            Ok(json!({ "hash": hash, "files": files }))
        }
        "snapshot_restore" => {
            let project = snapshot_project(args, state).await?;
            let hash = arg_str(args, "hash")?;
            let restored = state.snapshots.restore(&project, hash).await;
            Ok(json!({ "restored": restored }))
        }
        "snapshot_diff" => {
            let project = snapshot_project(args, state).await?;
            let hash = arg_str(args, "hash")?;
            let diff = state.snapshots.diff(&project, hash).await;
            Ok(json!({ "diff": diff }))
        }
        _ => Err(ToolError::new(
            ErrorCode::UnknownMethod,
            format!("unknown method: {method}"),
        )),
    }
}

/// Shared by the `status` RPC and the local unix-socket API.
pub async fn status_value(state: &Arc<AppState>) -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "pid": std::process::id(),
        "hostId": state.cfg.host_id,
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "connected": state.connected.load(Ordering::Relaxed),
        "startedAt": state.started_wall.to_rfc3339(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "projects": state.projects.count().await,
    })
}

async fn get_context(args: &Map<String, Value>) -> Result<Value, ToolError> {
    let cwd = arg_str(args, "cwd")?;
    let canonical = std::fs::canonicalize(cwd)
        .map_err(|e| ToolError::validation(format!("bad cwd: {e}")))?;
    if !canonical.is_dir() {
        return Err(ToolError::validation("cwd is not a directory"));
    }
    let (files, truncated) = tokio::task::spawn_blocking(move || {
        walk::context_files(&canonical, limits::WALK_MAX_ENTRIES / 4)
    })
    .await
    .map_err(|e| ToolError::internal(e.to_string()))?;
    Ok(json!({ "cwd": cwd, "files": files, "truncated": truncated }))
}

async fn snapshot_project(
    args: &Map<String, Value>,
    state: &Arc<AppState>,
) -> Result<tether_protocol::Project, ToolError> {
    let id = arg_str(args, "projectId").or_else(|_| arg_str(args, "project_id"))?;
    state.projects.get(id).await.ok_or_else(|| {
        ToolError::new(
            ErrorCode::SnapshotError,
            format!("unknown project for snapshot: {id}"),
        )
    })
}

fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::validation(format!("missing required argument: {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;

    #[tokio::test]
    async fn unknown_method_gets_a_code() {
        let (state, _data) = test_state();
        let err = handle("summon", &Map::new(), &state).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownMethod);
    }

    #[tokio::test]
    async fn project_lifecycle_over_rpc() {
        let (state, _data) = test_state();
        let proj_dir = tempfile::tempdir().unwrap();

        let mut args = Map::new();
        args.insert("cwd".into(), json!(proj_dir.path().to_str().unwrap()));
        args.insert("name".into(), json!("demo"));
        let created = handle("register_project", &args, &state).await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let listed = handle("list_projects", &Map::new(), &state).await.unwrap();
        assert_eq!(listed["projects"].as_array().unwrap().len(), 1);

        let mut get_args = Map::new();
        get_args.insert("id".into(), json!(id));
        let fetched = handle("get_project", &get_args, &state).await.unwrap();
        assert_eq!(fetched["name"], "demo");

        let removed = handle("unregister_project", &get_args, &state)
            .await
            .unwrap();
        assert_eq!(removed["removed"], true);
    }

    #[tokio::test]
    async fn snapshot_rpcs_reject_unknown_projects() {
        let (state, _data) = test_state();
        let mut args = Map::new();
        args.insert("projectId".into(), json!("nope"));
        let err = handle("snapshot_track", &args, &state).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SnapshotError);
    }

    #[tokio::test]
    async fn status_reports_identity_and_counts() {
        let (state, _data) = test_state();
        let status = handle("status", &Map::new(), &state).await.unwrap();
        assert_eq!(status["projects"], 0);
        assert_eq!(status["connected"], false);
        assert!(status["version"].as_str().is_some());
    }
}
