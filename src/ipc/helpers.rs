use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

/// Handler-internal failure carrying the wire error code. Converted to a
/// response at the call site where the request id is known.
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

    pub fn with_details(code: &'static str, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

/// Required, non-empty string param; surrounding whitespace is dropped.
pub fn require_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must not be empty", key),
        ));
    }
    Ok(s)
}

pub fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn user_role(conn: &Connection, user_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| {
        r.get(0)
    })
    .optional()
    .map_err(HandlerErr::db)
}

/// Removes a user and everything hanging off them, in dependency order:
/// lessons under the teacher's assignments, the assignments themselves,
/// owned tests with their questions/answers/tries, the user's own tries,
/// group membership and group ownership. Runs inside the caller's
/// transaction.
pub fn delete_user_cascade(conn: &Connection, user_id: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "DELETE FROM lesson_assets
         WHERE lesson_id IN (
           SELECT l.id
           FROM lessons l
           JOIN group_subjects gs ON gs.id = l.assignment_id
           WHERE gs.teacher_id = ?
         )",
        [user_id],
    )?;
    conn.execute(
        "DELETE FROM lessons
         WHERE assignment_id IN (SELECT id FROM group_subjects WHERE teacher_id = ?)",
        [user_id],
    )?;
    conn.execute("DELETE FROM group_subjects WHERE teacher_id = ?", [user_id])?;

    conn.execute(
        "UPDATE lessons SET test_id = NULL
         WHERE test_id IN (SELECT id FROM tests WHERE owner_id = ?)",
        [user_id],
    )?;
    conn.execute(
        "DELETE FROM tries
         WHERE test_id IN (SELECT id FROM tests WHERE owner_id = ?)",
        [user_id],
    )?;
    conn.execute(
        "DELETE FROM answers
         WHERE question_id IN (
           SELECT q.id
           FROM questions q
           JOIN tests t ON t.id = q.test_id
           WHERE t.owner_id = ?
         )",
        [user_id],
    )?;
    conn.execute(
        "DELETE FROM questions
         WHERE test_id IN (SELECT id FROM tests WHERE owner_id = ?)",
        [user_id],
    )?;
    conn.execute("DELETE FROM tests WHERE owner_id = ?", [user_id])?;

    conn.execute("DELETE FROM tries WHERE user_id = ?", [user_id])?;
    conn.execute("DELETE FROM group_members WHERE student_id = ?", [user_id])?;
    conn.execute("UPDATE groups SET owner_id = NULL WHERE owner_id = ?", [user_id])?;
    conn.execute("DELETE FROM users WHERE id = ?", [user_id])?;
    Ok(())
}
