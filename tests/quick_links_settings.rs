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

fn link_names(links: &serde_json::Value) -> Vec<String> {
    links["links"]
        .as_array()
        .expect("links")
        .iter()
        .map(|l| l["name"].as_str().unwrap_or("").to_string())
        .collect()
}

#[test]
fn quick_links_seed_once_and_keep_their_order() {
    let workspace = temp_dir("scrubbuddy-quick-links");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = sign_in(&mut stdin, &mut reader, &workspace, "student@example.com");

    let first = request_ok(&mut stdin, &mut reader, "1", "quickLinks.list", json!({}));
    assert_eq!(
        link_names(&first),
        vec!["NewInnovations", "VSLO", "ERAS", "MyNBME", "UWorld"]
    );
    let again = request_ok(&mut stdin, &mut reader, "2", "quickLinks.list", json!({}));
    assert_eq!(again["links"].as_array().map(|a| a.len()), Some(5));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "quickLinks.create",
        json!({ "name": "Anki" }),
    );
    assert_eq!(e["code"], "bad_params");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "quickLinks.create",
        json!({ "name": "Anki", "url": "https://apps.ankiweb.net" }),
    );
    assert_eq!(created["order"], 5);
    let anki = created["id"].as_str().expect("link id").to_string();

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "quickLinks.update",
        json!({ "id": anki, "name": "AnkiWeb" }),
    );
    assert_eq!(updated["name"], "AnkiWeb");
    assert_eq!(updated["url"], "https://apps.ankiweb.net");
    assert_eq!(updated["order"], 5);

    let uworld = first["links"][4]["id"].as_str().expect("uworld id").to_string();
    let reordered = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "quickLinks.reorder",
        json!({ "ids": [anki, uworld] }),
    );
    let names = link_names(&reordered);
    assert_eq!(names[0], "AnkiWeb");
    assert_eq!(names[1], "UWorld");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "quickLinks.delete",
        json!({ "id": anki }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "quickLinks.delete",
        json!({ "id": anki }),
    );
    assert_eq!(e["code"], "not_found");

    let remaining = request_ok(&mut stdin, &mut reader, "9", "quickLinks.list", json!({}));
    assert_eq!(remaining["links"].as_array().map(|a| a.len()), Some(5));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn quick_links_are_private_to_their_owner() {
    let workspace = temp_dir("scrubbuddy-quick-links-owner");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = sign_in(&mut stdin, &mut reader, &workspace, "first@example.com");
    let listed = request_ok(&mut stdin, &mut reader, "1", "quickLinks.list", json!({}));
    let theirs = listed["links"][0]["id"].as_str().expect("link id").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signIn",
        json!({ "email": "second@example.com" }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "quickLinks.update",
        json!({ "id": theirs, "name": "Hijacked" }),
    );
    assert_eq!(e["code"], "not_found");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "quickLinks.delete",
        json!({ "id": theirs }),
    );
    assert_eq!(e["code"], "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn shelf_settings_merge_overrides_onto_bank_sizes() {
    let workspace = temp_dir("scrubbuddy-settings");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = sign_in(&mut stdin, &mut reader, &workspace, "student@example.com");

    let defaults = request_ok(&mut stdin, &mut reader, "1", "uworld.settings.get", json!({}));
    assert_eq!(defaults["settings"]["OBGYN"], 535);
    assert_eq!(defaults["settings"]["Internal Medicine"], 1921);
    assert_eq!(defaults["settings"].as_object().map(|o| o.len()), Some(7));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "uworld.settings.update",
        json!({ "subject": "peds", "totalQuestions": 700 }),
    );
    assert_eq!(updated["subject"], "Pediatrics");
    assert_eq!(updated["isShelfSubject"], true);

    let other = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "uworld.settings.update",
        json!({ "subject": "Dermatology", "totalQuestions": 50 }),
    );
    assert_eq!(other["isShelfSubject"], false);

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "uworld.settings.update",
        json!({ "subject": "Surgery", "totalQuestions": -1 }),
    );
    assert_eq!(e["code"], "bad_params");

    let merged = request_ok(&mut stdin, &mut reader, "5", "uworld.settings.get", json!({}));
    assert_eq!(merged["settings"]["Pediatrics"], 700);
    assert_eq!(merged["settings"]["Surgery"], 638);
    assert!(merged["settings"].get("Dermatology").is_none());

    let _ = std::fs::remove_dir_all(workspace);
}
