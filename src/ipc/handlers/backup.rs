use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn required_path(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

fn workspace_for(state: &AppState, req: &Request) -> Option<PathBuf> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
}

fn handle_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_path(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(workspace_path) = workspace_for(state, req) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!(error = %e, "wal checkpoint before export failed");
        }
    }

    let summary = match backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path)) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(path = %out_path, error = %format!("{e:#}"), "bundle export failed");
            return err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": out_path })),
            );
        }
    };
    tracing::info!(path = %out_path, bytes = summary.db_bytes, "workspace bundle exported");

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "bundleFormat": summary.bundle_format,
            "dbSha256": summary.db_sha256,
            "dbBytes": summary.db_bytes
        }),
    )
}

fn handle_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match required_path(req, "inPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(workspace_path) = workspace_for(state, req) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // The open handle must go before its file is replaced.
    state.db = None;

    let summary = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(path = %in_path, error = %format!("{e:#}"), "bundle import failed");
            return err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": in_path })),
            );
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            tracing::info!(workspace = %workspace_path.display(), "workspace bundle imported");
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "dbSha256": summary.db_sha256
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_workspace_bundle(state, req)),
        _ => None,
    }
}
