use crate::defaults::{self, UWORLD_QUESTION_TOTALS};
use crate::ipc::helpers::{db_err, opt_i64, required_str, respond, scoped, HandlerErr};
use crate::ipc::types::{AppState, Request, SessionUser};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

fn settings_get(conn: &Connection, user: &SessionUser) -> Result<serde_json::Value, HandlerErr> {
    let mut merged: BTreeMap<String, i64> = UWORLD_QUESTION_TOTALS
        .iter()
        .map(|(subject, total)| (subject.to_string(), *total))
        .collect();

    let mut stmt = conn
        .prepare("SELECT subject, total_questions FROM uworld_settings WHERE user_id = ?")
        .map_err(db_err("db_query_failed", "uworld_settings"))?;
    let overrides = stmt
        .query_map([&user.id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "uworld_settings"))?;

    // Overrides for subjects outside the shelf list are kept but not reported.
    for (subject, total) in overrides {
        if let Some(slot) = merged.get_mut(&subject) {
            *slot = total;
        }
    }
    Ok(json!({ "settings": merged }))
}

fn settings_update(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject = defaults::normalize_shelf_subject(&required_str(params, "subject")?);
    let total = match opt_i64(params, "totalQuestions") {
        Some(v) if v >= 0 => v,
        _ => {
            return Err(HandlerErr::bad_params(
                "totalQuestions must be a non-negative integer",
            ))
        }
    };
    conn.execute(
        "INSERT INTO uworld_settings(user_id, subject, total_questions)
         VALUES(?, ?, ?)
         ON CONFLICT(user_id, subject) DO UPDATE SET
            total_questions = excluded.total_questions",
        (&user.id, &subject, total),
    )
    .map_err(db_err("db_update_failed", "uworld_settings"))?;
    Ok(json!({
        "subject": subject,
        "totalQuestions": total,
        "isShelfSubject": defaults::is_shelf_subject(&subject),
    }))
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| settings_get(conn, user));
    respond(req, result)
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| settings_update(conn, user, &req.params));
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "uworld.settings.get" => Some(handle_settings_get(state, req)),
        "uworld.settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
