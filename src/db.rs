use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "scrubbuddy.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS uworld_logs(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            date TEXT NOT NULL,
            questions_total INTEGER NOT NULL,
            questions_correct INTEGER NOT NULL,
            time_spent_mins INTEGER,
            mode TEXT,
            block_name TEXT,
            subjects TEXT NOT NULL DEFAULT '[]',
            systems TEXT NOT NULL DEFAULT '[]',
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uworld_logs_user ON uworld_logs(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uworld_logs_user_block ON uworld_logs(user_id, block_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS uworld_questions(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            log_id TEXT,
            question_id TEXT NOT NULL CHECK(question_id <> ''),
            topic TEXT NOT NULL,
            subject TEXT,
            system TEXT,
            category TEXT,
            percent_others INTEGER NOT NULL DEFAULT 0,
            time_spent INTEGER NOT NULL DEFAULT 0,
            is_correct INTEGER NOT NULL,
            test_name TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(log_id) REFERENCES uworld_logs(id),
            UNIQUE(user_id, question_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uworld_questions_log ON uworld_questions(log_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS uworld_incorrects(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            question_id TEXT NOT NULL CHECK(question_id <> ''),
            topic TEXT NOT NULL,
            subject TEXT,
            system TEXT,
            category TEXT,
            percent_others INTEGER NOT NULL DEFAULT 0,
            time_spent INTEGER NOT NULL DEFAULT 0,
            test_name TEXT,
            status TEXT NOT NULL DEFAULT 'needs_review',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            UNIQUE(user_id, question_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uworld_incorrects_user ON uworld_incorrects(user_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS uworld_tests(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            test_name TEXT NOT NULL,
            test_id TEXT NOT NULL,
            total_correct INTEGER NOT NULL,
            total_incorrect INTEGER NOT NULL,
            total_omitted INTEGER NOT NULL DEFAULT 0,
            percent_correct INTEGER NOT NULL,
            reported_score INTEGER,
            notes TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uworld_tests_user ON uworld_tests(user_id, test_name)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS uworld_test_subjects(
            id TEXT PRIMARY KEY,
            test_id TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            category TEXT NOT NULL,
            total_questions INTEGER NOT NULL,
            correct INTEGER NOT NULL,
            incorrect INTEGER NOT NULL,
            omitted INTEGER NOT NULL,
            percent_correct INTEGER NOT NULL,
            FOREIGN KEY(test_id) REFERENCES uworld_tests(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uworld_test_subjects_test ON uworld_test_subjects(test_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS uworld_settings(
            user_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            total_questions INTEGER NOT NULL,
            PRIMARY KEY(user_id, subject),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quick_links(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quick_links_user ON quick_links(user_id, sort_order)",
        [],
    )?;

    Ok(conn)
}

/// RFC 3339 UTC timestamp with millisecond precision; sorts lexically.
pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

pub fn tags_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_roundtrip_and_tolerate_garbage() {
        let tags = vec!["OBGYN".to_string(), "Surgery".to_string()];
        assert_eq!(tags_from_json(&tags_to_json(&tags)), tags);
        assert!(tags_from_json("not json").is_empty());
    }

    #[test]
    fn open_db_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("scrubbuddy-db-{}", uuid::Uuid::new_v4()));
        open_db(&dir).expect("first open");
        let conn = open_db(&dir).expect("second open");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM uworld_logs", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
        let _ = std::fs::remove_dir_all(dir);
    }
}
