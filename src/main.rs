mod backup;
mod calc;
mod config;
mod db;
mod defaults;
mod ipc;
mod paste;
mod reconcile;
mod scrape;

use std::io::{self, BufRead, Write};

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // stdout carries the IPC protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;
    Ok(())
}

fn bootstrap(state: &mut ipc::AppState, cfg: &config::Config) {
    let Some(path) = cfg.workspace.as_ref() else {
        return;
    };
    let conn = match db::open_db(path) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to open configured workspace");
            return;
        }
    };
    tracing::info!(path = %path.display(), "opened configured workspace");

    if let Some(email) = cfg.default_user.as_deref() {
        match ipc::upsert_user(&conn, email, None) {
            Ok(user) => {
                tracing::info!(email = %user.email, "signed in configured user");
                state.user = Some(user);
            }
            Err(e) => tracing::warn!(error = %e, "failed to sign in configured user"),
        }
    }
    state.workspace = Some(path.clone());
    state.db = Some(conn);
}

fn main() {
    let cfg = match config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}; falling back to defaults");
            config::Config::default()
        }
    };
    if let Err(e) = init_tracing(&cfg.log) {
        eprintln!("{e}");
    }

    let mut state = ipc::AppState::default();
    bootstrap(&mut state, &cfg);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                // No id to echo back.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
