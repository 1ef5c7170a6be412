use crate::db::now_ts;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request, SessionUser};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// Finds or creates the user for an email, matched case-insensitively.
/// A provided name replaces the stored one.
pub fn upsert_user(
    conn: &Connection,
    email: &str,
    name: Option<&str>,
) -> rusqlite::Result<SessionUser> {
    let email = email.trim().to_lowercase();
    conn.execute(
        "INSERT INTO users(id, email, name, created_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(email) DO UPDATE SET
            name = COALESCE(excluded.name, users.name)",
        (Uuid::new_v4().to_string(), &email, name, now_ts()),
    )?;
    conn.query_row(
        "SELECT id, email, name FROM users WHERE email = ?",
        [&email],
        |r| {
            Ok(SessionUser {
                id: r.get(0)?,
                email: r.get(1)?,
                name: r.get(2)?,
            })
        },
    )
}

fn user_json(user: &SessionUser) -> serde_json::Value {
    json!({
        "userId": user.id,
        "email": user.email,
        "name": user.name,
    })
}

fn sign_in(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = required_str(params, "email")?;
    if !email.contains('@') {
        return Err(HandlerErr::bad_params("email must contain @"));
    }
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let user = upsert_user(conn, &email, name).map_err(db_err("db_insert_failed", "users"))?;
    tracing::info!(email = %user.email, "signed in");
    let body = user_json(&user);
    state.user = Some(user);
    Ok(body)
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = sign_in(state, &req.params);
    respond(req, result)
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was = state.user.take();
    ok(&req.id, json!({ "signedOut": was.is_some() }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.user.as_ref() {
        Some(user) => ok(&req.id, user_json(user)),
        None => err(&req.id, "unauthorized", "sign in first", None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
