use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_str, get_required_str, to_json, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notices::NoticeKind;
use crate::platform::{Capability, PermissionState};
use serde_json::json;

fn parse_state(raw: &str) -> Result<PermissionState, HandlerErr> {
    PermissionState::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown permission state: {}", raw)))
}

async fn handle_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let status = state.permissions.check().await;
    ok(
        &req.id,
        json!({ "permissions": to_json(&status), "canScan": status.can_scan() }),
    )
}

/// Runs the prompt sequence. The shell may pass the answers its own prompts
/// produced (`camera`, `geolocation`); they are recorded before the gate runs.
async fn handle_request_permissions(state: &mut AppState, req: &Request) -> serde_json::Value {
    for (key, capability) in [
        ("camera", Capability::Camera),
        ("geolocation", Capability::Geolocation),
    ] {
        match get_optional_str(&req.params, key) {
            Ok(None) => {}
            Ok(Some(raw)) => match parse_state(&raw) {
                Ok(answer) => state.platform.report_permission(capability, answer),
                Err(e) => return e.response(&req.id),
            },
            Err(e) => return e.response(&req.id),
        }
    }

    match state.permissions.request().await {
        Ok(status) => ok(
            &req.id,
            json!({ "permissions": to_json(&status), "canScan": status.can_scan() }),
        ),
        Err(e) => {
            state
                .notices
                .push(NoticeKind::PermissionRequired, e.to_string());
            let mut resp = HandlerErr::from(e);
            resp.details = Some(json!({ "permissions": to_json(&state.permissions.status()) }));
            resp.response(&req.id)
        }
    }
}

fn handle_changed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let capability = match get_required_str(&req.params, "capability") {
        Ok(raw) => match Capability::parse(&raw) {
            Some(c) => c,
            None => {
                return HandlerErr::bad_params(format!("unknown capability: {}", raw))
                    .response(&req.id)
            }
        },
        Err(e) => return e.response(&req.id),
    };
    let new_state = match get_required_str(&req.params, "state").and_then(|raw| parse_state(&raw)) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };

    state.platform.report_permission(capability, new_state);
    let changed = state.permissions.apply_change(capability, new_state);
    let status = state.permissions.status();
    ok(
        &req.id,
        json!({
            "changed": changed,
            "permissions": to_json(&status),
            "canScan": status.can_scan(),
        }),
    )
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "permissions.check" => Some(handle_check(state, req).await),
        "permissions.request" => Some(handle_request_permissions(state, req).await),
        "permissions.changed" => Some(handle_changed(state, req)),
        _ => None,
    }
}
