use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, SessionUser};
use crate::reconcile::ReconcileError;
use rusqlite::Connection;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        Self {
            code: "not_found",
            message: format!("{what} not found"),
            details: Some(json!({ "id": id })),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ReconcileError> for HandlerErr {
    fn from(e: ReconcileError) -> Self {
        let code = e.code();
        if code != "bad_params" {
            tracing::error!(error = %e, code, "import failed");
        }
        Self {
            code,
            details: e.details(),
            message: e.to_string(),
        }
    }
}

/// Maps a storage failure to an envelope error, tagging the table involved.
pub fn db_err(code: &'static str, table: &'static str) -> impl FnOnce(rusqlite::Error) -> HandlerErr {
    move |e| {
        tracing::error!(table, error = %e, code, "database call failed");
        HandlerErr {
            code,
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }
}

pub fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

/// The signed-in user and the open workspace, checked in that order.
pub fn scoped(state: &AppState) -> Result<(&Connection, &SessionUser), HandlerErr> {
    let Some(user) = state.user.as_ref() else {
        return Err(HandlerErr::new("unauthorized", "sign in first"));
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    Ok((conn, user))
}

pub fn require_user(state: &AppState) -> Result<&SessionUser, HandlerErr> {
    state
        .user
        .as_ref()
        .ok_or_else(|| HandlerErr::new("unauthorized", "sign in first"))
}

pub fn opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    opt_str(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {key}")))
}

pub fn opt_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn opt_str_list(params: &serde_json::Value, key: &str) -> Option<Vec<String>> {
    params.get(key).and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect()
    })
}

/// Decodes a typed request body, reporting serde's message on failure.
pub fn parse_body<T: serde::de::DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))
}
