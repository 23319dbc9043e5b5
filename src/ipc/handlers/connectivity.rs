use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_bool, get_required_f64, to_json, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Location;
use serde_json::json;

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "online": state.connectivity.is_online() }))
}

/// Platform online/offline event. Reconnect drains are driven by the
/// engine's own subscription, not by this handler.
fn handle_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let online = match get_required_bool(&req.params, "online") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let transition = state.connectivity.set_online(online);
    ok(
        &req.id,
        json!({
            "online": state.connectivity.is_online(),
            "transition": to_json(&transition),
        }),
    )
}

fn parse_fix(params: &serde_json::Value) -> Result<Location, HandlerErr> {
    Ok(Location {
        latitude: get_required_f64(params, "latitude")?,
        longitude: get_required_f64(params, "longitude")?,
        accuracy: get_required_f64(params, "accuracy")?,
    })
}

fn handle_location(state: &mut AppState, req: &Request) -> serde_json::Value {
    match parse_fix(&req.params) {
        Ok(fix) => {
            state.platform.report_location(Some(fix));
            ok(&req.id, json!({ "location": to_json(&fix) }))
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_location_unavailable(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.platform.report_location(None);
    ok(&req.id, json!({ "location": null }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "connectivity.get" => Some(handle_get(state, req)),
        "connectivity.set" => Some(handle_set(state, req)),
        "device.location" => Some(handle_location(state, req)),
        "device.locationUnavailable" => Some(handle_location_unavailable(state, req)),
        _ => None,
    }
}
