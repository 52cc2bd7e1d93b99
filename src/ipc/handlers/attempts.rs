use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scoring::{self, AnswerDef, QuestionDef, QuestionKind, TestDef};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Materialize the full test definition the scoring engine works on.
/// Returns None when the test row itself is missing.
fn load_test_def(conn: &Connection, test_id: &str) -> Result<Option<TestDef>, HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM tests WHERE id = ?", [test_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Ok(None);
    }

    let mut q_stmt = conn
        .prepare("SELECT id, kind FROM questions WHERE test_id = ? ORDER BY sort_order")
        .map_err(HandlerErr::db)?;
    let rows: Vec<(String, String)> = q_stmt
        .query_map([test_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut a_stmt = conn
        .prepare(
            "SELECT id, text, correct FROM answers WHERE question_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;

    let mut questions = Vec::with_capacity(rows.len());
    for (question_id, kind_raw) in rows {
        let Some(kind) = QuestionKind::parse(&kind_raw) else {
            return Err(HandlerErr::with_details(
                "bad_state",
                "question has an unrecognized kind",
                json!({ "questionId": question_id, "kind": kind_raw }),
            ));
        };
        let answers = a_stmt
            .query_map([&question_id], |row| {
                Ok(AnswerDef {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    correct: row.get::<_, i64>(2)? != 0,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db)?;
        questions.push(QuestionDef {
            id: question_id,
            kind,
            answers,
        });
    }

    Ok(Some(TestDef { questions }))
}

fn submit_attempt(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(actor_id) = req.actor.as_deref() else {
        return Err(HandlerErr::new("bad_params", "missing actor"));
    };
    let test_id = require_str(&req.params, "testId")?;
    let Some(submission) = req.params.get("answers").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing answers object"));
    };

    let Some(test) = load_test_def(conn, &test_id)? else {
        return Err(HandlerErr::new("not_found", "test not found"));
    };

    let score = match scoring::score_submission(&test, submission) {
        Ok(v) => v,
        Err(e) => {
            // A misconfigured test must fail loudly, never store a bogus score.
            return Err(HandlerErr::with_details(
                "test_unscorable",
                e.to_string(),
                json!({ "code": e.code(), "testId": test_id }),
            ));
        }
    };

    let try_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO tries(id, user_id, test_id, score, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&try_id, actor_id, &test_id, score, &created_at),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "tryId": try_id, "score": score }))
}

fn check_test(conn: &Connection, test_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM tests WHERE id = ?", [test_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "test not found"));
    }
    Ok(())
}

fn list_attempts(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let test_id = require_str(&req.params, "testId")?;
    let user_id = optional_str(&req.params, "userId");
    check_test(conn, &test_id)?;

    let base = "SELECT tr.id, tr.user_id, u.last_name, u.first_name, tr.score, tr.created_at
         FROM tries tr
         JOIN users u ON u.id = tr.user_id
         WHERE tr.test_id = ?";
    let (sql, bind): (String, Vec<String>) = match user_id {
        Some(uid) => (
            format!("{} AND tr.user_id = ? ORDER BY tr.rowid", base),
            vec![test_id.clone(), uid],
        ),
        None => (format!("{} ORDER BY tr.rowid", base), vec![test_id.clone()]),
    };

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let tries = stmt
        .query_map(rusqlite::params_from_iter(bind), |row| {
            Ok(json!({
                "tryId": row.get::<_, String>(0)?,
                "userId": row.get::<_, String>(1)?,
                "userName": format!(
                    "{}, {}",
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?
                ),
                "score": row.get::<_, f64>(4)?,
                "createdAt": row.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "tries": tries }))
}

fn best_attempt(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let test_id = require_str(&req.params, "testId")?;
    let user_id = optional_str(&req.params, "userId");
    check_test(conn, &test_id)?;

    // No tries reads as 0, matching how lesson pages present an untouched test.
    let best: f64 = match user_id.as_deref() {
        Some(uid) => conn
            .query_row(
                "SELECT COALESCE(MAX(score), 0) FROM tries WHERE test_id = ? AND user_id = ?",
                (&test_id, uid),
                |r| r.get(0),
            )
            .map_err(HandlerErr::db)?,
        None => conn
            .query_row(
                "SELECT COALESCE(MAX(score), 0) FROM tries WHERE test_id = ?",
                [&test_id],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db)?,
    };

    Ok(json!({ "testId": test_id, "bestScore": best }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Request) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attempts.submit" => Some(with_conn(state, req, submit_attempt)),
        "attempts.list" => Some(with_conn(state, req, list_attempts)),
        "attempts.best" => Some(with_conn(state, req, best_attempt)),
        _ => None,
    }
}
