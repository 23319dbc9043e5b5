use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_i64, get_required_str, require_core, to_json, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

async fn handle_start(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_i64(&req.params, "studentId")?;
    if student_id <= 0 {
        return Err(HandlerErr::bad_params("studentId must be positive"));
    }
    let scan = require_core(state)?.scan.clone();
    scan.start(student_id).await?;
    Ok(json!({ "scan": to_json(&scan.status()) }))
}

async fn handle_decode(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let text = get_required_str(&req.params, "text")?;
    let core = require_core(state)?;
    let (scan, sync) = (core.scan.clone(), core.sync.clone());
    let result = scan.on_decode(&text).await;
    sync.refresh_pending();
    let success = result?;
    Ok(to_json(&success))
}

fn handle_stop(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let core = require_core(state)?;
    core.scan.stop();
    Ok(json!({ "scan": to_json(&core.scan.status()) }))
}

fn handle_status(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let core = require_core(state)?;
    Ok(json!({
        "scan": to_json(&core.scan.status()),
        "permissions": to_json(&state.permissions.status()),
        "openCameraStreams": state.platform.open_streams(),
    }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "scan.start" => handle_start(state, req).await,
        "scan.decode" => handle_decode(state, req).await,
        "scan.stop" => handle_stop(state),
        "scan.status" => handle_status(state),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
