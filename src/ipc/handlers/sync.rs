use crate::error::SyncError;
use crate::ipc::error::ok;
use crate::ipc::helpers::{require_core, to_json, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sync::DrainOutcome;
use serde_json::json;

async fn handle_trigger(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let engine = require_core(state)?.sync.clone();
    let outcome = engine.trigger_sync().await?;
    if let DrainOutcome::Failed { error, .. } = &outcome {
        let mut e = HandlerErr::from(SyncError::Failed(error.clone()));
        e.details = Some(to_json(&outcome));
        return Err(e);
    }
    Ok(json!({ "outcome": to_json(&outcome), "status": to_json(&engine.status()) }))
}

fn handle_status(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let engine = &require_core(state)?.sync;
    engine.refresh_pending();
    Ok(to_json(&engine.status()))
}

fn handle_drain_notifications(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({ "notifications": to_json(&state.notices.drain()) }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sync.trigger" => handle_trigger(state).await,
        "sync.status" => handle_status(state),
        "notifications.drain" => handle_drain_notifications(state),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
