use crate::calc::{self, IncorrectRow, QuestionOutcome};
use crate::db::{now_ts, tags_from_json};
use crate::defaults::INCORRECT_STATUSES;
use crate::ipc::helpers::{db_err, opt_str, required_str, respond, scoped, HandlerErr};
use crate::ipc::types::{AppState, Request, SessionUser};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

fn breakdown(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let log_id = opt_str(params, "logId");
    let mut sql = String::from(
        "SELECT subject, system, category, topic, is_correct
         FROM uworld_questions
         WHERE user_id = ?",
    );
    let mut values = vec![Value::Text(user.id.clone())];

    if let Some(log_id) = log_id.as_deref() {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM uworld_logs WHERE id = ? AND user_id = ?",
                (log_id, &user.id),
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err("db_query_failed", "uworld_logs"))?;
        if exists.is_none() {
            return Err(HandlerErr::not_found("log", log_id));
        }
        sql.push_str(" AND log_id = ?");
        values.push(Value::Text(log_id.to_string()));
    }

    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_err("db_query_failed", "uworld_questions"))?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| {
            Ok(QuestionOutcome {
                subject: r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                system: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                category: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                topic: r.get(3)?,
                is_correct: r.get::<_, i64>(4)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "uworld_questions"))?;

    let result = calc::compute_breakdown(&rows);
    Ok(json!({ "logId": log_id, "breakdown": result }))
}

fn load_incorrects(
    conn: &Connection,
    user_id: &str,
    status: Option<&str>,
) -> Result<Vec<IncorrectRow>, HandlerErr> {
    let mut sql = String::from(
        "SELECT id, question_id, topic, system, subject, category, percent_others,
                status, test_name, created_at
         FROM uworld_incorrects
         WHERE user_id = ?",
    );
    let mut values = vec![Value::Text(user_id.to_string())];
    if let Some(status) = status {
        sql.push_str(" AND status = ?");
        values.push(Value::Text(status.to_string()));
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_err("db_query_failed", "uworld_incorrects"))?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| {
            Ok(IncorrectRow {
                id: r.get(0)?,
                question_id: r.get(1)?,
                topic: r.get(2)?,
                system: r.get(3)?,
                subject: r.get(4)?,
                category: r.get(5)?,
                percent_others: r.get(6)?,
                status: r.get(7)?,
                test_name: r.get(8)?,
                created_at: r.get(9)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "uworld_incorrects"))?;
    Ok(rows)
}

fn weak_areas(conn: &Connection, user: &SessionUser) -> Result<serde_json::Value, HandlerErr> {
    let incorrects = load_incorrects(conn, &user.id, None)?;
    serde_json::to_value(calc::compute_weak_areas(incorrects))
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn validate_status(params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    let Some(status) = opt_str(params, "status") else {
        return Ok(None);
    };
    if !INCORRECT_STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("unknown status: {status}"),
            details: Some(json!({ "allowed": INCORRECT_STATUSES })),
        });
    }
    Ok(Some(status))
}

fn incorrects_list(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let status = validate_status(params)?;
    let rows = load_incorrects(conn, &user.id, status.as_deref())?;
    Ok(json!({ "incorrects": rows }))
}

fn incorrects_set_status(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let question_id = required_str(params, "questionId")?;
    let Some(status) = validate_status(params)? else {
        return Err(HandlerErr::bad_params("missing status"));
    };
    let changed = conn
        .execute(
            "UPDATE uworld_incorrects SET status = ?, updated_at = ?
             WHERE user_id = ? AND question_id = ?",
            (&status, now_ts(), &user.id, &question_id),
        )
        .map_err(db_err("db_update_failed", "uworld_incorrects"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("incorrect question", &question_id));
    }
    Ok(json!({ "questionId": question_id, "status": status }))
}

fn tests_list(conn: &Connection, user: &SessionUser) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, test_name, test_id, total_correct, total_incorrect, total_omitted,
                    percent_correct, reported_score, notes, created_at
             FROM uworld_tests
             WHERE user_id = ?
             ORDER BY created_at DESC",
        )
        .map_err(db_err("db_query_failed", "uworld_tests"))?;
    let tests = stmt
        .query_map([&user.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "testName": r.get::<_, String>(1)?,
                "testId": r.get::<_, String>(2)?,
                "totalCorrect": r.get::<_, i64>(3)?,
                "totalIncorrect": r.get::<_, i64>(4)?,
                "totalOmitted": r.get::<_, i64>(5)?,
                "percentCorrect": r.get::<_, i64>(6)?,
                "reportedScore": r.get::<_, Option<i64>>(7)?,
                "notes": r.get::<_, Option<String>>(8)?,
                "createdAt": r.get::<_, String>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "uworld_tests"))?;

    let mut subj_stmt = conn
        .prepare(
            "SELECT subject_name, category, total_questions, correct, incorrect, omitted,
                    percent_correct
             FROM uworld_test_subjects
             WHERE test_id = ?
             ORDER BY total_questions DESC, subject_name",
        )
        .map_err(db_err("db_query_failed", "uworld_test_subjects"))?;

    let mut out = Vec::with_capacity(tests.len());
    for mut test in tests {
        let test_row_id = test["id"].as_str().unwrap_or("").to_string();
        let subjects = subj_stmt
            .query_map([&test_row_id], |r| {
                Ok(json!({
                    "subjectName": r.get::<_, String>(0)?,
                    "category": r.get::<_, String>(1)?,
                    "totalQuestions": r.get::<_, i64>(2)?,
                    "correct": r.get::<_, i64>(3)?,
                    "incorrect": r.get::<_, i64>(4)?,
                    "omitted": r.get::<_, i64>(5)?,
                    "percentCorrect": r.get::<_, i64>(6)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err("db_query_failed", "uworld_test_subjects"))?;
        test["subjects"] = json!(subjects);
        out.push(test);
    }
    Ok(json!({ "tests": out }))
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates.
fn parse_log_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn debug_summary(conn: &Connection, user: &SessionUser) -> Result<serde_json::Value, HandlerErr> {
    let now = Utc::now();
    let today = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now);
    let week_ago = today - Duration::days(7);

    let mut stmt = conn
        .prepare(
            "SELECT id, date, block_name, questions_total, subjects, mode
             FROM uworld_logs
             WHERE user_id = ?
             ORDER BY date DESC",
        )
        .map_err(db_err("db_query_failed", "uworld_logs"))?;
    let logs = stmt
        .query_map([&user.id], |r| {
            let subjects: String = r.get(4)?;
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, i64>(3)?,
                tags_from_json(&subjects),
                r.get::<_, Option<String>>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "uworld_logs"))?;

    let mut with_tags = 0usize;
    let mut total_questions = 0i64;
    let (mut week_logs, mut week_questions) = (0usize, 0i64);
    let (mut today_logs, mut today_questions) = (0usize, 0i64);
    let mut excluded = Vec::new();

    for (id, date, block_name, questions, subjects, mode) in &logs {
        if subjects.is_empty() {
            excluded.push(json!({
                "id": id,
                "date": date,
                "blockName": block_name,
                "questionsTotal": questions,
                "mode": mode,
                "reason": "No subject tags",
            }));
            continue;
        }
        with_tags += 1;
        total_questions = total_questions.saturating_add(*questions);
        let Some(when) = parse_log_date(date) else {
            continue;
        };
        if when >= week_ago {
            week_logs += 1;
            week_questions = week_questions.saturating_add(*questions);
        }
        if when >= today {
            today_logs += 1;
            today_questions = today_questions.saturating_add(*questions);
        }
    }

    Ok(json!({
        "serverTime": now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "serverToday": today.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "serverWeekAgo": week_ago.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "summary": {
            "totalLogs": logs.len(),
            "logsWithSubjects": with_tags,
            "logsWithoutSubjects": logs.len() - with_tags,
            "totalQuestions": total_questions,
            "weekLogs": week_logs,
            "weekQuestions": week_questions,
            "todayLogs": today_logs,
            "todayQuestions": today_questions,
        },
        "excludedLogs": excluded,
    }))
}

fn handle_breakdown(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| breakdown(conn, user, &req.params));
    respond(req, result)
}

fn handle_weak_areas(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| weak_areas(conn, user));
    respond(req, result)
}

fn handle_tests_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| tests_list(conn, user));
    respond(req, result)
}

fn handle_incorrects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| incorrects_list(conn, user, &req.params));
    respond(req, result)
}

fn handle_incorrects_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result =
        scoped(state).and_then(|(conn, user)| incorrects_set_status(conn, user, &req.params));
    respond(req, result)
}

fn handle_debug(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| debug_summary(conn, user));
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "uworld.breakdown" => Some(handle_breakdown(state, req)),
        "uworld.weakAreas" => Some(handle_weak_areas(state, req)),
        "uworld.tests.list" => Some(handle_tests_list(state, req)),
        "uworld.incorrects.list" => Some(handle_incorrects_list(state, req)),
        "uworld.incorrects.setStatus" => Some(handle_incorrects_set_status(state, req)),
        "uworld.debug" => Some(handle_debug(state, req)),
        _ => None,
    }
}
