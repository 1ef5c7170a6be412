use crate::calc;
use crate::db::{now_ts, tags_from_json, tags_to_json};
use crate::ipc::helpers::{
    db_err, opt_i64, opt_str, opt_str_list, required_str, respond, scoped, HandlerErr,
};
use crate::ipc::types::{AppState, Request, SessionUser};
use crate::reconcile::{self, NewLog};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

const LOG_COLUMNS: &str = "id, date, questions_total, questions_correct, time_spent_mins, mode,
    block_name, subjects, systems, notes, created_at, updated_at";

struct LogRow {
    id: String,
    date: String,
    questions_total: i64,
    questions_correct: i64,
    time_spent_mins: Option<i64>,
    mode: Option<String>,
    block_name: Option<String>,
    subjects: Vec<String>,
    systems: Vec<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

impl LogRow {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let subjects: String = r.get(7)?;
        let systems: String = r.get(8)?;
        Ok(Self {
            id: r.get(0)?,
            date: r.get(1)?,
            questions_total: r.get(2)?,
            questions_correct: r.get(3)?,
            time_spent_mins: r.get(4)?,
            mode: r.get(5)?,
            block_name: r.get(6)?,
            subjects: tags_from_json(&subjects),
            systems: tags_from_json(&systems),
            notes: r.get(9)?,
            created_at: r.get(10)?,
            updated_at: r.get(11)?,
        })
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "date": self.date,
            "questionsTotal": self.questions_total,
            "questionsCorrect": self.questions_correct,
            "timeSpentMins": self.time_spent_mins,
            "mode": self.mode,
            "blockName": self.block_name,
            "subjects": self.subjects,
            "systems": self.systems,
            "notes": self.notes,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

/// The user's sessions, newest first.
fn load_logs(conn: &Connection, user_id: &str) -> Result<Vec<LogRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM uworld_logs
             WHERE user_id = ?
             ORDER BY date DESC, created_at DESC"
        ))
        .map_err(db_err("db_query_failed", "uworld_logs"))?;
    let rows = stmt
        .query_map([user_id], LogRow::from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "uworld_logs"))?;
    Ok(rows)
}

fn find_log(conn: &Connection, user_id: &str, log_id: &str) -> Result<LogRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {LOG_COLUMNS} FROM uworld_logs WHERE id = ? AND user_id = ?"),
        (log_id, user_id),
        LogRow::from_row,
    )
    .optional()
    .map_err(db_err("db_query_failed", "uworld_logs"))?
    .ok_or_else(|| HandlerErr::not_found("log", log_id))
}

/// Deletes sessions by id, detaching their question records first.
/// Callers pass only ids they have already scoped to the user.
fn delete_logs(conn: &Connection, ids: &[String]) -> Result<usize, HandlerErr> {
    if ids.is_empty() {
        return Ok(0);
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_delete_failed", "uworld_logs"))?;
    let mut deleted = 0usize;
    for id in ids {
        tx.execute(
            "UPDATE uworld_questions SET log_id = NULL WHERE log_id = ?",
            [id],
        )
        .map_err(db_err("db_update_failed", "uworld_questions"))?;
        deleted += tx
            .execute("DELETE FROM uworld_logs WHERE id = ?", [id])
            .map_err(db_err("db_delete_failed", "uworld_logs"))?;
    }
    tx.commit()
        .map_err(db_err("db_delete_failed", "uworld_logs"))?;
    Ok(deleted)
}

/// Remaining session count, and questions across sessions that carry subject tags.
fn remaining_totals(conn: &Connection, user_id: &str) -> Result<(usize, i64), HandlerErr> {
    let logs = load_logs(conn, user_id)?;
    let tagged_questions = logs
        .iter()
        .filter(|l| !l.subjects.is_empty())
        .fold(0i64, |acc, l| acc.saturating_add(l.questions_total));
    Ok((logs.len(), tagged_questions))
}

fn logs_list(conn: &Connection, user: &SessionUser) -> Result<serde_json::Value, HandlerErr> {
    let logs = load_logs(conn, &user.id)?;
    let stats = calc::compute_log_stats(
        logs.iter()
            .map(|l| (l.questions_total, l.questions_correct, l.subjects.as_slice())),
    );
    let logs_json: Vec<serde_json::Value> = logs.iter().map(LogRow::to_json).collect();
    Ok(json!({ "logs": logs_json, "stats": stats }))
}

fn logs_create(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let total = match opt_i64(params, "questionsTotal") {
        Some(v) if v > 0 => v,
        _ => return Err(HandlerErr::bad_params("questionsTotal must be a positive integer")),
    };
    let Some(correct) = opt_i64(params, "questionsCorrect") else {
        return Err(HandlerErr::bad_params("missing questionsCorrect"));
    };
    if correct < 0 || correct > total {
        return Err(HandlerErr::bad_params(
            "questionsCorrect must be between 0 and questionsTotal",
        ));
    }

    let log = NewLog {
        date: opt_str(params, "date"),
        questions_total: total,
        questions_correct: correct,
        time_spent_mins: opt_i64(params, "timeSpentMins"),
        mode: opt_str(params, "mode"),
        block_name: opt_str(params, "blockName"),
        subjects: opt_str_list(params, "subjects").unwrap_or_default(),
        systems: opt_str_list(params, "systems").unwrap_or_default(),
        notes: opt_str(params, "notes"),
    };
    let id = reconcile::insert_log(conn, &user.id, &log)?;
    let row = find_log(conn, &user.id, &id)?;
    Ok(json!({ "log": row.to_json() }))
}

fn logs_get(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let log_id = required_str(params, "id")?;
    Ok(find_log(conn, &user.id, &log_id)?.to_json())
}

fn nullable_str(v: &serde_json::Value) -> Value {
    match v.as_str() {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn logs_update(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let log_id = required_str(params, "id")?;
    let existing = find_log(conn, &user.id, &log_id)?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(v) = params.get("date").and_then(|v| v.as_str()) {
        sets.push("date = ?");
        values.push(Value::Text(v.to_string()));
    }
    let mut total = existing.questions_total;
    let mut correct = existing.questions_correct;
    for (key, column, slot) in [
        ("questionsTotal", "questions_total = ?", &mut total),
        ("questionsCorrect", "questions_correct = ?", &mut correct),
    ] {
        if let Some(v) = params.get(key) {
            let Some(n) = v.as_i64() else {
                return Err(HandlerErr::bad_params(format!("{key} must be an integer")));
            };
            *slot = n;
            sets.push(column);
            values.push(Value::Integer(n));
        }
    }
    // Checked against the patched row, not just the fields sent.
    if total <= 0 {
        return Err(HandlerErr::bad_params("questionsTotal must be a positive integer"));
    }
    if correct < 0 || correct > total {
        return Err(HandlerErr::bad_params(
            "questionsCorrect must be between 0 and questionsTotal",
        ));
    }
    if let Some(v) = params.get("timeSpentMins") {
        sets.push("time_spent_mins = ?");
        values.push(v.as_i64().map(Value::Integer).unwrap_or(Value::Null));
    }
    for (key, column) in [
        ("mode", "mode = ?"),
        ("blockName", "block_name = ?"),
        ("notes", "notes = ?"),
    ] {
        if let Some(v) = params.get(key) {
            sets.push(column);
            values.push(nullable_str(v));
        }
    }
    for (key, column) in [("subjects", "subjects = ?"), ("systems", "systems = ?")] {
        if let Some(tags) = opt_str_list(params, key) {
            sets.push(column);
            values.push(Value::Text(tags_to_json(&tags)));
        }
    }

    if !sets.is_empty() {
        sets.push("updated_at = ?");
        values.push(Value::Text(now_ts()));
        values.push(Value::Text(log_id.clone()));
        conn.execute(
            &format!("UPDATE uworld_logs SET {} WHERE id = ?", sets.join(", ")),
            params_from_iter(values),
        )
        .map_err(db_err("db_update_failed", "uworld_logs"))?;
    }

    Ok(find_log(conn, &user.id, &log_id)?.to_json())
}

fn logs_delete(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let log_id = required_str(params, "id")?;
    find_log(conn, &user.id, &log_id)?;
    delete_logs(conn, &[log_id])?;
    Ok(json!({ "success": true }))
}

fn cleanup(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let requested = opt_str_list(params, "ids").unwrap_or_default();
    let delete_no_name = params
        .get("deleteNoName")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let logs = load_logs(conn, &user.id)?;
    let doomed: Vec<String> = logs
        .into_iter()
        .filter(|l| {
            requested.contains(&l.id)
                || (delete_no_name && l.block_name.as_deref().map_or(true, str::is_empty))
        })
        .map(|l| l.id)
        .collect();
    let deleted = delete_logs(conn, &doomed)?;
    let (remaining, questions) = remaining_totals(conn, &user.id)?;
    tracing::info!(deleted, remaining, "cleaned up sessions");

    Ok(json!({
        "success": true,
        "deletedCount": deleted,
        "totalLogsRemaining": remaining,
        "totalQuestionsAfterCleanup": questions,
    }))
}

fn dedupe(conn: &Connection, user: &SessionUser) -> Result<serde_json::Value, HandlerErr> {
    let logs = load_logs(conn, &user.id)?;
    let mut seen = std::collections::HashSet::new();
    let mut duplicates = Vec::new();
    for log in logs {
        let Some(name) = log.block_name.filter(|n| !n.is_empty()) else {
            continue;
        };
        // Newest first, so the first occurrence is the keeper.
        if !seen.insert(name) {
            duplicates.push(log.id);
        }
    }
    let removed = delete_logs(conn, &duplicates)?;
    let (remaining, questions) = remaining_totals(conn, &user.id)?;
    tracing::info!(removed, remaining, "removed duplicate sessions");

    Ok(json!({
        "success": true,
        "duplicatesRemoved": removed,
        "totalLogsRemaining": remaining,
        "totalQuestionsAfterDedupe": questions,
        "message": format!("Removed {removed} duplicate log entries"),
    }))
}

fn clear_subject(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject = required_str(params, "subject")?;
    let doomed: Vec<String> = load_logs(conn, &user.id)?
        .into_iter()
        .filter(|l| l.subjects.iter().any(|s| *s == subject))
        .map(|l| l.id)
        .collect();
    let deleted = delete_logs(conn, &doomed)?;
    tracing::info!(subject = %subject, deleted, "cleared subject sessions");
    Ok(json!({ "success": true, "deletedCount": deleted }))
}

fn handle_logs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| logs_list(conn, user));
    respond(req, result)
}

fn handle_logs_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| logs_create(conn, user, &req.params));
    respond(req, result)
}

fn handle_logs_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| logs_get(conn, user, &req.params));
    respond(req, result)
}

fn handle_logs_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| logs_update(conn, user, &req.params));
    respond(req, result)
}

fn handle_logs_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| logs_delete(conn, user, &req.params));
    respond(req, result)
}

fn handle_cleanup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| cleanup(conn, user, &req.params));
    respond(req, result)
}

fn handle_dedupe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| dedupe(conn, user));
    respond(req, result)
}

fn handle_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| clear_subject(conn, user, &req.params));
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "uworld.logs.list" => Some(handle_logs_list(state, req)),
        "uworld.logs.create" => Some(handle_logs_create(state, req)),
        "uworld.logs.get" => Some(handle_logs_get(state, req)),
        "uworld.logs.update" => Some(handle_logs_update(state, req)),
        "uworld.logs.delete" => Some(handle_logs_delete(state, req)),
        "uworld.cleanup" => Some(handle_cleanup(state, req)),
        "uworld.dedupe" => Some(handle_dedupe(state, req)),
        "uworld.clear" => Some(handle_clear(state, req)),
        _ => None,
    }
}
