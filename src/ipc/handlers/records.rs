use crate::error::StoreError;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_str, get_required_i64, require_core, to_json, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::RecordStatus;
use serde_json::json;

/// Without a status filter this lists the retry set (pending and failed);
/// `"ALL"` includes records that are synced but not yet reaped.
fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let filter = get_optional_str(&req.params, "status")?;
    let store = &require_core(state)?.store;
    let records = match filter.as_deref().map(str::trim) {
        None | Some("") => store.list_pending()?,
        Some(raw) if raw.eq_ignore_ascii_case("all") => store.list_all()?,
        Some(raw) => {
            let status = RecordStatus::parse(raw)
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", raw)))?;
            store.list_with_status(status)?
        }
    };
    Ok(json!({ "records": to_json(&records) }))
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_i64(&req.params, "id")?;
    let record = require_core(state)?
        .store
        .get(id)?
        .ok_or(StoreError::RecordNotFound(id))?;
    Ok(json!({ "record": to_json(&record) }))
}

fn handle_counts(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let counts = require_core(state)?.store.counts()?;
    Ok(json!({
        "counts": to_json(&counts),
        "unsynced": counts.unsynced(),
    }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "records.list" => handle_list(state, req),
        "records.get" => handle_get(state, req),
        "records.counts" => handle_counts(state),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
