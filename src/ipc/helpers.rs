use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::db("db_query_failed", e)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

/// Runs `f` against the open workspace database and wraps the outcome in
/// the response envelope.
pub fn with_conn(
    state: &AppState,
    req: &Request,
    f: fn(&Connection, &Value) -> HandlerResult,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            if error.code.starts_with("db_") {
                tracing::error!(method = %req.method, code = error.code, message = %error.message, "request failed");
            }
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::bad_params(format!("{} must be string or null", key)));
            };
            let t = s.trim();
            Ok((!t.is_empty()).then(|| t.to_string()))
        }
    }
}

/// Numbers may arrive as JSON numbers or numeric strings from form posts.
pub fn get_optional_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    let n = match params.get(key) {
        None => return Ok(None),
        Some(v) if v.is_null() => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match n {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    get_optional_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_str_array(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    arr.iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(HandlerErr::bad_params(format!(
                "{} must contain only ids",
                key
            ))),
        })
        .collect()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fixed-width UTC stamp so stored values sort chronologically as text.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// `Ok(())` when a row with `id` exists in `table`.
pub fn require_row(conn: &Connection, table: &str, id: &str, label: &str) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query)?;
    match found {
        Some(_) => Ok(()),
        None => Err(HandlerErr::not_found(format!("{} not found", label))
            .with_details(json!({ "id": id }))),
    }
}

pub fn parse_json_column(raw: Option<String>, fallback: Value) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(fallback)
}
