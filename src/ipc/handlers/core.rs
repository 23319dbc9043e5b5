use crate::device::{DeviceIdentity, Prefs};
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_bool, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request, WorkspaceCore};
use crate::scan::ScanSession;
use crate::store::RecordStore;
use crate::sync::SyncEngine;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace().map(|p| p.to_string_lossy().to_string()),
            "online": state.connectivity.is_online(),
        }),
    )
}

fn open_workspace(state: &mut AppState, path: PathBuf) -> Result<WorkspaceCore, HandlerErr> {
    let store = Arc::new(RecordStore::new(path.clone()));
    store.init()?;

    let identity = match &state.device_identity {
        Some(shared) => Arc::clone(shared),
        None => Arc::new(DeviceIdentity::new(Prefs::in_workspace(&path))),
    };
    let sync = Arc::new(SyncEngine::new(
        Arc::clone(&store),
        state.api.clone(),
        Arc::clone(&state.connectivity),
        identity,
        Arc::clone(&state.notices),
        state.config.retry_policy(),
    ));
    let scan = Arc::new(ScanSession::new(
        Arc::clone(&state.permissions),
        state.platform.clone(),
        Arc::clone(&state.connectivity),
        state.api.clone(),
        Arc::clone(&store),
        Arc::clone(&state.notices),
    ));

    sync.refresh_pending();
    let mut tasks = vec![
        sync.spawn_auto_sync(state.connectivity.subscribe()),
        sync.spawn_pending_refresh(state.config.pending_refresh),
        scan.spawn_permission_watch(state.permissions.subscribe()),
    ];
    if state.connectivity.is_online() {
        let engine = Arc::clone(&sync);
        tasks.push(tokio::spawn(async move {
            let outcome = engine.drain().await;
            tracing::debug!(?outcome, "initial drain finished");
        }));
    }

    Ok(WorkspaceCore {
        path,
        store,
        sync,
        scan,
        tasks,
    })
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match get_required_str(&req.params, "path") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return e.response(&req.id),
    };
    let online = match get_optional_bool(&req.params, "online") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Tear the previous workspace down before the new one starts its tasks.
    state.core = None;
    if let Some(online) = online {
        state.connectivity.set_online(online);
    }

    match open_workspace(state, path.clone()) {
        Ok(core) => {
            tracing::info!(workspace = %path.to_string_lossy(), "workspace opened");
            state.core = Some(core);
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "online": state.connectivity.is_online(),
                }),
            )
        }
        Err(e) => {
            tracing::error!(workspace = %path.to_string_lossy(), error = %e.message, "workspace open failed");
            e.response(&req.id)
        }
    }
}

fn handle_session_configure(state: &mut AppState, req: &Request) -> serde_json::Value {
    let base_url = match get_optional_str(&req.params, "apiBaseUrl") {
        Ok(v) => v.filter(|s| !s.trim().is_empty()),
        Err(e) => return e.response(&req.id),
    };
    // An explicit null clears the token; an absent key leaves it alone.
    let token = match req.params.get("accessToken") {
        None => None,
        Some(serde_json::Value::Null) => Some(None),
        Some(serde_json::Value::String(s)) => Some(Some(s.clone())),
        Some(_) => {
            return HandlerErr::bad_params("accessToken must be a string or null")
                .response(&req.id)
        }
    };

    state.api.configure(base_url, token);
    ok(
        &req.id,
        json!({
            "apiBaseUrl": state.api.base_url(),
            "hasToken": state.api.has_token(),
        }),
    )
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.configure" => Some(handle_session_configure(state, req)),
        _ => None,
    }
}
