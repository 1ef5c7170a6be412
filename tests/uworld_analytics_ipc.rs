use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_scrubbuddyd");
    let mut child = Command::new(exe)
        .env_remove("SCRUBBUDDY_WORKSPACE")
        .env_remove("SCRUBBUDDY_DEFAULT_USER")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn scrubbuddyd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded",
        method
    );
    value.get("error").cloned().expect("error object")
}

fn sign_in(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
    email: &str,
) -> serde_json::Value {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(stdin, reader, "signin", "auth.signIn", json!({ "email": email }))
}

fn question(
    id: &str,
    correct: bool,
    subject: &str,
    system: &str,
    topic: &str,
    percent_others: i64,
) -> serde_json::Value {
    json!({
        "questionId": id,
        "isCorrect": correct,
        "subject": subject,
        "system": system,
        "category": "General",
        "topic": topic,
        "percentOthers": percent_others,
        "timeSpent": 60
    })
}

fn seed_two_blocks(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String) {
    let first = request_ok(
        stdin,
        reader,
        "seed-1",
        "uworld.importJson",
        json!({
            "testName": "Block 1",
            "testId": "1",
            "questions": [
                question("118154", true, "OBGYN", "Pregnancy", "Preeclampsia", 61),
                question("118155", false, "Surgery", "GI", "Splenic rupture", 40),
                question("118156", false, "OBGYN", "Pregnancy", "Placenta previa", 55),
            ]
        }),
    );
    let second = request_ok(
        stdin,
        reader,
        "seed-2",
        "uworld.importJson",
        json!({
            "testName": "Block 2",
            "testId": "2",
            "questions": [
                question("118160", false, "Surgery", "GI", "Splenic rupture", 30),
                question("118161", true, "Medicine", "Renal", "Hyperkalemia", 70),
            ]
        }),
    );
    (
        first["stats"]["logId"].as_str().expect("log 1").to_string(),
        second["stats"]["logId"].as_str().expect("log 2").to_string(),
    )
}

#[test]
fn breakdown_groups_by_dimension_for_a_log_and_overall() {
    let workspace = temp_dir("scrubbuddy-breakdown");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = sign_in(&mut stdin, &mut reader, &workspace, "student@example.com");
    let (first, _) = seed_two_blocks(&mut stdin, &mut reader);

    let one = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "uworld.breakdown",
        json!({ "logId": first }),
    );
    let b = &one["breakdown"];
    assert_eq!(b["questionCount"], 3);
    assert_eq!(
        b["bySubject"][0],
        json!({ "name": "OBGYN", "total": 2, "correct": 1, "incorrect": 1, "percentage": 50 })
    );
    assert_eq!(b["bySubject"][1]["name"], "Surgery");
    assert_eq!(b["byCategory"].as_array().map(|a| a.len()), Some(1));

    let all = request_ok(&mut stdin, &mut reader, "2", "uworld.breakdown", json!({}));
    let b = &all["breakdown"];
    assert_eq!(b["questionCount"], 5);
    let subjects: Vec<&str> = b["bySubject"]
        .as_array()
        .expect("bySubject")
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert_eq!(subjects, vec!["OBGYN", "Surgery", "Medicine"]);
    assert_eq!(b["byTopic"][0]["name"], "Splenic rupture");
    assert_eq!(b["byTopic"][0]["total"], 2);
    assert_eq!(b["byTopic"][0]["percentage"], 0);
    assert_eq!(b["byTopic"][1]["name"], "Hyperkalemia");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "uworld.breakdown",
        json!({ "logId": "no-such-log" }),
    );
    assert_eq!(e["code"], "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn weak_areas_rank_topics_systems_and_subjects() {
    let workspace = temp_dir("scrubbuddy-weak-areas");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = sign_in(&mut stdin, &mut reader, &workspace, "student@example.com");

    let empty = request_ok(&mut stdin, &mut reader, "0", "uworld.weakAreas", json!({}));
    assert_eq!(empty["totalIncorrects"], 0);
    assert_eq!(empty["weakAreas"], json!([]));

    let _ = seed_two_blocks(&mut stdin, &mut reader);
    let weak = request_ok(&mut stdin, &mut reader, "1", "uworld.weakAreas", json!({}));
    assert_eq!(weak["totalIncorrects"], 3);

    let top = &weak["weakAreas"][0];
    assert_eq!(top["topic"], "Splenic rupture");
    assert_eq!(top["count"], 2);
    assert_eq!(top["avgPercentOthers"], 35);
    assert_eq!(top["subject"], "Surgery");
    assert_eq!(weak["weakAreas"].as_array().map(|a| a.len()), Some(2));

    assert_eq!(weak["weakSystems"][0], json!({ "system": "GI", "count": 2 }));
    assert_eq!(weak["weakSubjects"][0], json!({ "subject": "Surgery", "count": 2 }));
    assert_eq!(weak["weakSubjects"][1], json!({ "subject": "OBGYN", "count": 1 }));
    assert_eq!(weak["recentIncorrects"].as_array().map(|a| a.len()), Some(3));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn logs_list_and_debug_summarise_sessions() {
    let workspace = temp_dir("scrubbuddy-log-stats");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = sign_in(&mut stdin, &mut reader, &workspace, "student@example.com");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "uworld.logs.create",
        json!({ "questionsTotal": 40, "questionsCorrect": 30, "subjects": ["OBGYN"] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "uworld.logs.create",
        json!({
            "questionsTotal": 20,
            "questionsCorrect": 10,
            "subjects": ["OBGYN", "Surgery"],
            "date": "2020-01-01T00:00:00.000Z"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "uworld.logs.create",
        json!({ "questionsTotal": 10, "questionsCorrect": 10 }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "uworld.logs.list", json!({}));
    let stats = &listed["stats"];
    assert_eq!(stats["totalQuestions"], 70);
    assert_eq!(stats["totalCorrect"], 50);
    assert_eq!(stats["percentage"], 71);
    assert_eq!(stats["systemStats"]["OBGYN"], json!({ "total": 60, "correct": 40 }));
    assert_eq!(stats["systemStats"]["Surgery"], json!({ "total": 20, "correct": 10 }));
    let logs = listed["logs"].as_array().expect("logs");
    assert_eq!(logs.last().map(|l| l["date"].clone()), Some(json!("2020-01-01T00:00:00.000Z")));

    let debug = request_ok(&mut stdin, &mut reader, "5", "uworld.debug", json!({}));
    let summary = &debug["summary"];
    assert_eq!(summary["totalLogs"], 3);
    assert_eq!(summary["logsWithSubjects"], 2);
    assert_eq!(summary["logsWithoutSubjects"], 1);
    assert_eq!(summary["totalQuestions"], 60);
    assert_eq!(summary["todayLogs"], 1);
    assert_eq!(summary["todayQuestions"], 40);
    assert_eq!(summary["weekLogs"], 1);
    assert_eq!(debug["excludedLogs"].as_array().map(|a| a.len()), Some(1));

    let _ = std::fs::remove_dir_all(workspace);
}
