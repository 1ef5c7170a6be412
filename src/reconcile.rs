use crate::calc;
use crate::db::{now_ts, tags_to_json};
use crate::defaults::{self, STATUS_NEEDS_REVIEW};
use crate::paste::{self, ParsedQuestion, PerformanceReport, ReportError};
use crate::scrape::{ImportJsonBody, ScrapedQuestion};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("{0}")]
    Invalid(String),
    #[error(
        "No questions found in the pasted text ({rows_dropped} rows could not be read). \
         Make sure you copied the table data correctly."
    )]
    NoQuestions { rows_dropped: usize },
    #[error("failed to read {table}: {source}")]
    Read {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to write {table}: {source}")]
    Write {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl ReconcileError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Invalid(_) | Self::NoQuestions { .. } => "bad_params",
            Self::Read { .. } => "db_query_failed",
            Self::Write { .. } => "db_insert_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Invalid(_) => None,
            Self::NoQuestions { rows_dropped } => {
                Some(serde_json::json!({ "rowsDropped": rows_dropped }))
            }
            Self::Read { table, .. } | Self::Write { table, .. } => {
                Some(serde_json::json!({ "table": table }))
            }
        }
    }
}

impl From<ReportError> for ReconcileError {
    fn from(e: ReportError) -> Self {
        Self::Invalid(e.to_string())
    }
}

fn read_err(table: &'static str) -> impl FnOnce(rusqlite::Error) -> ReconcileError {
    move |source| ReconcileError::Read { table, source }
}

fn write_err(table: &'static str) -> impl FnOnce(rusqlite::Error) -> ReconcileError {
    move |source| ReconcileError::Write { table, source }
}

/// Longest time a single question can plausibly take, in seconds.
const MAX_QUESTION_SECS: i64 = 24 * 60 * 60;

fn clamp_percent(v: i64) -> i64 {
    v.clamp(0, 100)
}

fn clamp_secs(v: i64) -> i64 {
    v.clamp(0, MAX_QUESTION_SECS)
}

/// A question normalized from either import path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedQuestion {
    pub question_id: String,
    pub subject: String,
    pub system: String,
    pub category: String,
    pub topic: String,
    pub percent_others: i64,
    pub time_spent: i64,
    pub is_correct: bool,
}

impl From<&ScrapedQuestion> for ImportedQuestion {
    fn from(q: &ScrapedQuestion) -> Self {
        Self {
            question_id: q.question_id.trim().to_string(),
            subject: q.subject.clone(),
            system: q.system.clone(),
            category: q.category.clone(),
            topic: q.topic.clone(),
            percent_others: clamp_percent(q.percent_others),
            time_spent: clamp_secs(q.time_spent),
            is_correct: q.is_correct,
        }
    }
}

impl ImportedQuestion {
    fn from_parsed(q: ParsedQuestion, is_correct: bool) -> Self {
        Self {
            question_id: q.question_id,
            subject: q.subject,
            system: q.system,
            category: q.category,
            topic: q.topic,
            percent_others: clamp_percent(q.percent_others),
            time_spent: clamp_secs(q.time_spent),
            is_correct,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewLog {
    pub date: Option<String>,
    pub questions_total: i64,
    pub questions_correct: i64,
    pub time_spent_mins: Option<i64>,
    pub mode: Option<String>,
    pub block_name: Option<String>,
    pub subjects: Vec<String>,
    pub systems: Vec<String>,
    pub notes: Option<String>,
}

pub fn insert_log(conn: &Connection, user_id: &str, log: &NewLog) -> Result<String, ReconcileError> {
    let id = Uuid::new_v4().to_string();
    let now = now_ts();
    conn.execute(
        "INSERT INTO uworld_logs(
            id, user_id, date, questions_total, questions_correct, time_spent_mins,
            mode, block_name, subjects, systems, notes, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            user_id,
            log.date.clone().unwrap_or_else(|| now.clone()),
            log.questions_total,
            log.questions_correct,
            log.time_spent_mins,
            log.mode,
            log.block_name,
            tags_to_json(&log.subjects),
            tags_to_json(&log.systems),
            log.notes,
            now,
            now,
        ],
    )
    .map_err(write_err("uworld_logs"))?;
    Ok(id)
}

/// Most recent session for a block name, if any.
pub fn find_log_by_block(
    conn: &Connection,
    user_id: &str,
    block_name: &str,
) -> Result<Option<String>, ReconcileError> {
    conn.query_row(
        "SELECT id FROM uworld_logs
         WHERE user_id = ? AND block_name = ?
         ORDER BY date DESC, created_at DESC
         LIMIT 1",
        (user_id, block_name),
        |r| r.get(0),
    )
    .optional()
    .map_err(read_err("uworld_logs"))
}

/// Overwrites a session's counts, tags and notes. The session date is kept.
fn replace_log_contents(conn: &Connection, log_id: &str, log: &NewLog) -> Result<(), ReconcileError> {
    conn.execute(
        "UPDATE uworld_logs SET
            questions_total = ?,
            questions_correct = ?,
            time_spent_mins = ?,
            mode = COALESCE(?, mode),
            subjects = ?,
            systems = ?,
            notes = ?,
            updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            log.questions_total,
            log.questions_correct,
            log.time_spent_mins,
            log.mode,
            tags_to_json(&log.subjects),
            tags_to_json(&log.systems),
            log.notes,
            now_ts(),
            log_id,
        ],
    )
    .map_err(write_err("uworld_logs"))?;
    Ok(())
}

/// Unlinks a session's question records. The batch written next relinks
/// the ones it still contains.
fn detach_log_questions(conn: &Connection, log_id: &str) -> Result<(), ReconcileError> {
    let detached = conn
        .execute(
            "UPDATE uworld_questions SET log_id = NULL WHERE log_id = ?",
            [log_id],
        )
        .map_err(write_err("uworld_questions"))?;
    tracing::debug!(log_id, detached, "detached merged session questions");
    Ok(())
}

pub struct TestSummary<'a> {
    pub test_name: &'a str,
    pub test_id: &'a str,
    pub correct: i64,
    pub incorrect: i64,
    pub omitted: i64,
    pub reported_score: Option<i64>,
    pub notes: Option<&'a str>,
}

fn insert_test_summary(
    conn: &Connection,
    user_id: &str,
    t: &TestSummary<'_>,
) -> Result<String, ReconcileError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO uworld_tests(
            id, user_id, test_name, test_id, total_correct, total_incorrect,
            total_omitted, percent_correct, reported_score, notes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            user_id,
            t.test_name,
            t.test_id,
            t.correct,
            t.incorrect,
            t.omitted,
            calc::percent(t.correct, t.correct.saturating_add(t.incorrect)),
            t.reported_score,
            t.notes,
            now_ts(),
        ],
    )
    .map_err(write_err("uworld_tests"))?;
    Ok(id)
}

/// Updates the test summary with the same name in place, or creates it.
/// Any stored subject breakdown is cleared on update.
fn upsert_test_summary(
    conn: &Connection,
    user_id: &str,
    t: &TestSummary<'_>,
) -> Result<String, ReconcileError> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM uworld_tests WHERE user_id = ? AND test_name = ? LIMIT 1",
            (user_id, t.test_name),
            |r| r.get(0),
        )
        .optional()
        .map_err(read_err("uworld_tests"))?;

    let Some(test_row_id) = existing else {
        return insert_test_summary(conn, user_id, t);
    };

    conn.execute(
        "DELETE FROM uworld_test_subjects WHERE test_id = ?",
        [&test_row_id],
    )
    .map_err(write_err("uworld_test_subjects"))?;
    conn.execute(
        "UPDATE uworld_tests SET
            total_correct = ?,
            total_incorrect = ?,
            total_omitted = ?,
            percent_correct = ?,
            reported_score = COALESCE(?, reported_score)
         WHERE id = ?",
        rusqlite::params![
            t.correct,
            t.incorrect,
            t.omitted,
            calc::percent(t.correct, t.correct.saturating_add(t.incorrect)),
            t.reported_score,
            test_row_id,
        ],
    )
    .map_err(write_err("uworld_tests"))?;
    Ok(test_row_id)
}

pub fn upsert_question(
    conn: &Connection,
    user_id: &str,
    log_id: Option<&str>,
    test_name: &str,
    q: &ImportedQuestion,
) -> Result<(), ReconcileError> {
    let now = now_ts();
    conn.execute(
        "INSERT INTO uworld_questions(
            id, user_id, log_id, question_id, topic, subject, system, category,
            percent_others, time_spent, is_correct, test_name, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id, question_id) DO UPDATE SET
            log_id = excluded.log_id,
            topic = excluded.topic,
            subject = excluded.subject,
            system = excluded.system,
            category = excluded.category,
            percent_others = excluded.percent_others,
            time_spent = excluded.time_spent,
            is_correct = excluded.is_correct,
            test_name = excluded.test_name,
            updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            user_id,
            log_id,
            q.question_id,
            q.topic,
            q.subject,
            q.system,
            q.category,
            q.percent_others,
            q.time_spent,
            q.is_correct as i64,
            test_name,
            now,
        ],
    )
    .map_err(write_err("uworld_questions"))?;
    Ok(())
}

/// A miss always puts the question back into review, whatever its status was.
pub fn upsert_incorrect(
    conn: &Connection,
    user_id: &str,
    test_name: &str,
    q: &ImportedQuestion,
) -> Result<(), ReconcileError> {
    let now = now_ts();
    conn.execute(
        "INSERT INTO uworld_incorrects(
            id, user_id, question_id, topic, subject, system, category,
            percent_others, time_spent, test_name, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id, question_id) DO UPDATE SET
            topic = excluded.topic,
            subject = excluded.subject,
            system = excluded.system,
            category = excluded.category,
            percent_others = excluded.percent_others,
            time_spent = excluded.time_spent,
            test_name = excluded.test_name,
            status = excluded.status,
            updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            user_id,
            q.question_id,
            q.topic,
            q.subject,
            q.system,
            q.category,
            q.percent_others,
            q.time_spent,
            test_name,
            STATUS_NEEDS_REVIEW,
            now,
            now,
        ],
    )
    .map_err(write_err("uworld_incorrects"))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub questions_saved: usize,
    pub incorrects_saved: usize,
    pub failed: usize,
}

/// Writes every question independently. A failed record is logged and
/// skipped; the rest of the batch still goes through.
pub fn write_question_batch(
    conn: &Connection,
    user_id: &str,
    log_id: Option<&str>,
    test_name: &str,
    questions: &[ImportedQuestion],
) -> BatchOutcome {
    let mut out = BatchOutcome::default();
    for q in questions {
        if let Err(e) = upsert_question(conn, user_id, log_id, test_name, q) {
            tracing::warn!(question_id = %q.question_id, error = %e, "failed to save question");
            out.failed += 1;
            continue;
        }
        out.questions_saved += 1;

        if q.is_correct {
            continue;
        }
        match upsert_incorrect(conn, user_id, test_name, q) {
            Ok(()) => out.incorrects_saved += 1,
            Err(e) => {
                tracing::warn!(question_id = %q.question_id, error = %e, "failed to save incorrect question");
            }
        }
    }
    out
}

/// Unique non-empty values in first-seen order.
fn unique_in_order<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for v in values {
        if !v.is_empty() && seen.insert(v) {
            out.push(v.to_string());
        }
    }
    out
}

fn total_minutes(questions: &[ImportedQuestion]) -> i64 {
    let secs = questions
        .iter()
        .fold(0i64, |acc, q| acc.saturating_add(q.time_spent));
    calc::round_half_up(secs as f64 / 60.0)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonImportStats {
    pub test_name: String,
    pub total_questions: i64,
    pub total_correct: i64,
    pub total_incorrect: i64,
    pub percent_correct: i64,
    pub questions_saved: usize,
    pub incorrects_saved: usize,
    pub subjects: Vec<String>,
    pub log_id: String,
}

/// Browser-scrape import. Always records a new session, even when the block
/// name was seen before, so an earlier session is never overwritten.
pub fn import_json(
    conn: &Connection,
    user_id: &str,
    body: &ImportJsonBody,
) -> Result<JsonImportStats, ReconcileError> {
    let test_name = body.test_name.trim();
    if test_name.is_empty() || body.questions.is_empty() {
        return Err(ReconcileError::Invalid(
            "testName and questions array are required".to_string(),
        ));
    }

    let questions: Vec<ImportedQuestion> = body.questions.iter().map(Into::into).collect();
    let total = questions.len() as i64;
    let correct = questions.iter().filter(|q| q.is_correct).count() as i64;
    let incorrect = total - correct;
    let subjects = unique_in_order(questions.iter().map(|q| q.subject.as_str()));
    let systems = unique_in_order(questions.iter().map(|q| q.system.as_str()));
    let test_id = if body.test_id.trim().is_empty() {
        test_name
    } else {
        body.test_id.trim()
    };

    let log_id = insert_log(
        conn,
        user_id,
        &NewLog {
            questions_total: total,
            questions_correct: correct,
            time_spent_mins: Some(total_minutes(&questions)),
            mode: Some("Test".to_string()),
            block_name: Some(test_name.to_string()),
            subjects: subjects.clone(),
            systems,
            notes: Some(format!("Imported via browser scrape - {}", body.test_id.trim())),
            ..NewLog::default()
        },
    )?;

    upsert_test_summary(
        conn,
        user_id,
        &TestSummary {
            test_name,
            test_id,
            correct,
            incorrect,
            omitted: 0,
            reported_score: body.score.map(calc::round_half_up),
            notes: None,
        },
    )?;

    let outcome = write_question_batch(conn, user_id, Some(&log_id), test_name, &questions);
    tracing::info!(
        test_name,
        total,
        correct,
        saved = outcome.questions_saved,
        incorrects_saved = outcome.incorrects_saved,
        failed = outcome.failed,
        "imported scraped test"
    );

    Ok(JsonImportStats {
        test_name: test_name.to_string(),
        total_questions: total,
        total_correct: correct,
        total_incorrect: incorrect,
        percent_correct: calc::percent(correct, total),
        questions_saved: outcome.questions_saved,
        incorrects_saved: outcome.incorrects_saved,
        subjects,
        log_id,
    })
}

#[derive(Debug, Clone, Default)]
pub struct TextImport {
    pub test_name: String,
    pub correct_text: Option<String>,
    pub incorrect_text: Option<String>,
    pub shelf_subject: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextImportStats {
    pub test_name: String,
    pub questions_parsed: usize,
    pub rows_dropped: usize,
    pub questions_saved: usize,
    pub incorrects_saved: usize,
    pub total_questions: i64,
    pub total_correct: i64,
    pub total_incorrect: i64,
    pub percent_correct: i64,
    pub subjects: Vec<String>,
    pub topics: Vec<String>,
    pub log_id: String,
    pub merged: bool,
}

/// Combines the correct and incorrect blocks. A question id present in both
/// keeps its first position and its last values.
fn merge_text_blocks(correct: Vec<ParsedQuestion>, incorrect: Vec<ParsedQuestion>) -> Vec<ImportedQuestion> {
    let mut out: Vec<ImportedQuestion> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let tagged = correct
        .into_iter()
        .map(|q| (q, true))
        .chain(incorrect.into_iter().map(|q| (q, false)));
    for (q, is_correct) in tagged {
        let q = ImportedQuestion::from_parsed(q, is_correct);
        match index.get(&q.question_id) {
            Some(&i) => out[i] = q,
            None => {
                index.insert(q.question_id.clone(), out.len());
                out.push(q);
            }
        }
    }
    out
}

/// Copy-paste import. Re-importing the same block name replaces the earlier
/// session's counts instead of adding a second session.
pub fn import_text(
    conn: &Connection,
    user_id: &str,
    req: &TextImport,
) -> Result<TextImportStats, ReconcileError> {
    let test_name = req.test_name.trim();
    let correct_text = req.correct_text.as_deref().unwrap_or("");
    let incorrect_text = req.incorrect_text.as_deref().unwrap_or("");
    if test_name.is_empty() || (correct_text.trim().is_empty() && incorrect_text.trim().is_empty()) {
        return Err(ReconcileError::Invalid(
            "testName and correctText or incorrectText are required".to_string(),
        ));
    }

    let correct_table = paste::parse_question_table(correct_text);
    let incorrect_table = paste::parse_question_table(incorrect_text);
    let rows_dropped = correct_table.rows_dropped + incorrect_table.rows_dropped;
    let questions_parsed = correct_table.questions.len() + incorrect_table.questions.len();
    tracing::info!(test_name, questions_parsed, rows_dropped, "parsed pasted question table");

    let questions = merge_text_blocks(correct_table.questions, incorrect_table.questions);
    if questions.is_empty() {
        return Err(ReconcileError::NoQuestions { rows_dropped });
    }

    let total = questions.len() as i64;
    let correct = questions.iter().filter(|q| q.is_correct).count() as i64;
    let shelf = req
        .shelf_subject
        .as_deref()
        .map(defaults::normalize_shelf_subject)
        .filter(|s| !s.is_empty());
    let subjects = unique_in_order(
        shelf
            .as_deref()
            .into_iter()
            .chain(questions.iter().map(|q| q.subject.as_str())),
    );
    let systems = unique_in_order(questions.iter().map(|q| q.system.as_str()));

    let log = NewLog {
        questions_total: total,
        questions_correct: correct,
        time_spent_mins: Some(total_minutes(&questions)),
        mode: Some("Test".to_string()),
        block_name: Some(test_name.to_string()),
        subjects: subjects.clone(),
        systems,
        notes: Some(format!(
            "Imported via text paste - {} questions ({} incorrect)",
            total,
            total - correct
        )),
        ..NewLog::default()
    };

    let (log_id, merged) = match find_log_by_block(conn, user_id, test_name)? {
        Some(id) => {
            replace_log_contents(conn, &id, &log)?;
            detach_log_questions(conn, &id)?;
            (id, true)
        }
        None => (insert_log(conn, user_id, &log)?, false),
    };

    let outcome = write_question_batch(conn, user_id, Some(&log_id), test_name, &questions);
    tracing::info!(
        test_name,
        merged,
        saved = outcome.questions_saved,
        failed = outcome.failed,
        "imported pasted test"
    );

    Ok(TextImportStats {
        test_name: test_name.to_string(),
        questions_parsed,
        rows_dropped,
        questions_saved: outcome.questions_saved,
        incorrects_saved: outcome.incorrects_saved,
        total_questions: total,
        total_correct: correct,
        total_incorrect: total - correct,
        percent_correct: calc::percent(correct, total),
        subjects,
        topics: questions.iter().map(|q| q.topic.clone()).collect(),
        log_id,
        merged,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ReportImport {
    pub text: Option<String>,
    pub total_correct: Option<i64>,
    pub total_incorrect: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ReportImportOutcome {
    #[serde(rename = "test", rename_all = "camelCase")]
    Test {
        id: String,
        test_name: String,
        total_correct: i64,
        total_incorrect: i64,
        total_questions: i64,
        percent_correct: i64,
        subjects_count: usize,
    },
    #[serde(rename = "overall", rename_all = "camelCase")]
    Overall {
        log_id: String,
        total_correct: i64,
        total_incorrect: i64,
        total_questions: i64,
        percentage: i64,
    },
}

fn insert_test_subjects(
    conn: &Connection,
    test_row_id: &str,
    rows: &[paste::ReportSubjectRow],
) -> Result<(), ReconcileError> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO uworld_test_subjects(
                id, test_id, subject_name, category, total_questions,
                correct, incorrect, omitted, percent_correct)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .map_err(write_err("uworld_test_subjects"))?;
    for s in rows {
        stmt.execute(rusqlite::params![
            Uuid::new_v4().to_string(),
            test_row_id,
            s.name,
            s.category,
            s.total,
            s.correct,
            s.incorrect,
            s.omitted,
            s.percent,
        ])
        .map_err(write_err("uworld_test_subjects"))?;
    }
    Ok(())
}

/// Imports totals from a performance report's text, or from manually entered
/// totals when no text is given.
pub fn import_report(
    conn: &Connection,
    user_id: &str,
    req: &ReportImport,
) -> Result<ReportImportOutcome, ReconcileError> {
    let text = req.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let (correct, incorrect) = match text.map(paste::parse_performance_report).transpose()? {
        Some(PerformanceReport::Test {
            test_name,
            correct,
            incorrect,
            omitted,
            subjects,
        }) => {
            let id = insert_test_summary(
                conn,
                user_id,
                &TestSummary {
                    test_name: &test_name,
                    test_id: &test_name,
                    correct,
                    incorrect,
                    omitted,
                    reported_score: None,
                    notes: req.notes.as_deref(),
                },
            )?;
            insert_test_subjects(conn, &id, &subjects)?;
            tracing::info!(test_name = %test_name, subjects = subjects.len(), "imported test report");
            return Ok(ReportImportOutcome::Test {
                id,
                total_correct: correct,
                total_incorrect: incorrect,
                total_questions: correct.saturating_add(incorrect).saturating_add(omitted),
                percent_correct: calc::percent(correct, correct.saturating_add(incorrect)),
                subjects_count: subjects.len(),
                test_name,
            });
        }
        Some(PerformanceReport::Overall { correct, incorrect }) => (correct, incorrect),
        None => match (req.total_correct, req.total_incorrect) {
            (Some(c), Some(i)) if c >= 0 && i >= 0 => (c, i),
            _ => {
                return Err(ReconcileError::Invalid(
                    "totalCorrect and totalIncorrect are required".to_string(),
                ))
            }
        },
    };

    let total = correct.saturating_add(incorrect);
    let log_id = insert_log(
        conn,
        user_id,
        &NewLog {
            questions_total: total,
            questions_correct: correct,
            time_spent_mins: Some(0),
            mode: Some("Bulk Import".to_string()),
            block_name: Some("Initial Progress".to_string()),
            notes: Some(
                req.notes
                    .clone()
                    .unwrap_or_else(|| "Bulk import of existing UWorld progress".to_string()),
            ),
            ..NewLog::default()
        },
    )?;

    Ok(ReportImportOutcome::Overall {
        log_id,
        total_correct: correct,
        total_incorrect: incorrect,
        total_questions: total,
        percentage: calc::percent(correct, total),
    })
}
