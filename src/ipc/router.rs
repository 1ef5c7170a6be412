use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "request");

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::uworld_import::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::uworld_logs::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::uworld_analytics::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::uworld_settings::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::quick_links::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup_exchange::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
