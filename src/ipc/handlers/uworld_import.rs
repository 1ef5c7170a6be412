use crate::ipc::helpers::{
    opt_i64, opt_str, parse_body, require_user, required_str, respond, scoped, HandlerErr,
};
use crate::ipc::types::{AppState, Request, SessionUser};
use crate::reconcile::{self, ReportImport, TextImport};
use crate::scrape::{self, ImportJsonBody};
use rusqlite::Connection;
use serde_json::json;

fn import_json(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let body: ImportJsonBody = parse_body(params)?;
    let stats = reconcile::import_json(conn, &user.id, &body)?;
    Ok(json!({ "success": true, "stats": stats }))
}

fn raw_text(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn import_text(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let req = TextImport {
        test_name: opt_str(params, "testName").unwrap_or_default(),
        correct_text: raw_text(params, "correctText"),
        incorrect_text: raw_text(params, "incorrectText"),
        shelf_subject: opt_str(params, "shelfSubject"),
    };
    let stats = reconcile::import_text(conn, &user.id, &req)?;
    Ok(json!({ "success": true, "stats": stats }))
}

fn import_report(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let req = ReportImport {
        text: raw_text(params, "text"),
        total_correct: opt_i64(params, "totalCorrect"),
        total_incorrect: opt_i64(params, "totalIncorrect"),
        notes: opt_str(params, "notes"),
    };
    let outcome = reconcile::import_report(conn, &user.id, &req)?;
    Ok(json!({ "success": true, "imported": outcome }))
}

fn extract_rows(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let test_name = required_str(params, "testName")?;
    let test_id = opt_str(params, "testId").unwrap_or_default();
    let Some(rows) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing rows"));
    };
    let rows: Vec<&str> = rows.iter().filter_map(|v| v.as_str()).collect();
    let body = scrape::extract_rows(&test_name, &test_id, &rows);
    serde_json::to_value(&body).map_err(|e| HandlerErr::new("bad_params", e.to_string()))
}

fn handle_import_json(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| import_json(conn, user, &req.params));
    respond(req, result)
}

fn handle_import_text(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| import_text(conn, user, &req.params));
    respond(req, result)
}

fn handle_import_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| import_report(conn, user, &req.params));
    respond(req, result)
}

fn handle_extract_rows(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = require_user(state).and_then(|_| extract_rows(&req.params));
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "uworld.importJson" => Some(handle_import_json(state, req)),
        "uworld.importText" => Some(handle_import_text(state, req)),
        "uworld.importReport" => Some(handle_import_report(state, req)),
        "uworld.extractRows" => Some(handle_extract_rows(state, req)),
        _ => None,
    }
}
