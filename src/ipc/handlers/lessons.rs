use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const LESSON_KINDS: [&str; 3] = ["lecture", "practical", "laboratory"];
const ASSET_KINDS: [&str; 2] = ["photo", "video"];

fn parse_kind(kinds: &[&str], raw: &str, what: &str) -> Result<String, HandlerErr> {
    let lowered = raw.to_ascii_lowercase();
    if kinds.contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(HandlerErr::with_details(
            "bad_params",
            format!("{} must be one of: {}", what, kinds.join(", ")),
            json!({ "kind": raw }),
        ))
    }
}

fn check_assignment(conn: &Connection, assignment_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM group_subjects WHERE id = ?",
            [assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    }
    Ok(())
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

fn list_lessons(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = optional_str(&req.params, "assignmentId");

    let base = "SELECT l.id, l.name, l.kind, l.assignment_id, l.test_id,
                (SELECT COUNT(*) FROM lesson_assets la WHERE la.lesson_id = l.id) AS asset_count
         FROM lessons l";
    let (sql, bind): (String, Vec<String>) = match assignment_id {
        Some(a) => (
            format!("{} WHERE l.assignment_id = ? ORDER BY l.name", base),
            vec![a],
        ),
        None => (format!("{} ORDER BY l.name", base), vec![]),
    };

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let lessons = stmt
        .query_map(rusqlite::params_from_iter(bind), |row| {
            Ok(json!({
                "lessonId": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "kind": row.get::<_, String>(2)?,
                "assignmentId": row.get::<_, Option<String>>(3)?,
                "testId": row.get::<_, Option<String>>(4)?,
                "assetCount": row.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "lessons": lessons }))
}

fn create_lesson(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let name = require_str(&req.params, "name")?;
    let kind = parse_kind(&LESSON_KINDS, &require_str(&req.params, "kind")?, "kind")?;
    let assignment_id = optional_str(&req.params, "assignmentId");
    let test_id = optional_str(&req.params, "testId");
    let body = optional_str(&req.params, "body");

    if let Some(a) = assignment_id.as_deref() {
        check_assignment(conn, a)?;
    }
    if let Some(t) = test_id.as_deref() {
        check_test(conn, t)?;
    }

    let lesson_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, name, kind, assignment_id, test_id, body)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&lesson_id, &name, &kind, &assignment_id, &test_id, &body),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "lessonId": lesson_id }))
}

fn update_lesson(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = require_str(&req.params, "lessonId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM lessons WHERE id = ?", [&lesson_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "lesson not found"));
    }

    let patch = req
        .params
        .get("patch")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    if let Some(v) = patch.get("name").and_then(|v| v.as_str()) {
        let name = v.trim();
        if name.is_empty() {
            return Err(HandlerErr::new("bad_params", "name must not be empty"));
        }
        conn.execute("UPDATE lessons SET name = ? WHERE id = ?", (name, &lesson_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(v) = patch.get("kind").and_then(|v| v.as_str()) {
        let kind = parse_kind(&LESSON_KINDS, v, "kind")?;
        conn.execute("UPDATE lessons SET kind = ? WHERE id = ?", (&kind, &lesson_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(v) = patch.get("body") {
        let body: Option<String> = v.as_str().map(|s| s.to_string());
        conn.execute("UPDATE lessons SET body = ? WHERE id = ?", (&body, &lesson_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    match patch.get("testId") {
        None => {}
        Some(serde_json::Value::Null) => {
            conn.execute(
                "UPDATE lessons SET test_id = NULL WHERE id = ?",
                [&lesson_id],
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
        Some(v) => {
            let Some(test_id) = v.as_str() else {
                return Err(HandlerErr::new("bad_params", "testId must be string or null"));
            };
            check_test(conn, test_id)?;
            conn.execute(
                "UPDATE lessons SET test_id = ? WHERE id = ?",
                (test_id, &lesson_id),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
    }
    match patch.get("assignmentId") {
        None => {}
        Some(serde_json::Value::Null) => {
            conn.execute(
                "UPDATE lessons SET assignment_id = NULL WHERE id = ?",
                [&lesson_id],
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
        Some(v) => {
            let Some(assignment_id) = v.as_str() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    "assignmentId must be string or null",
                ));
            };
            check_assignment(conn, assignment_id)?;
            conn.execute(
                "UPDATE lessons SET assignment_id = ? WHERE id = ?",
                (assignment_id, &lesson_id),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
    }

    Ok(json!({ "lessonId": lesson_id }))
}

fn delete_lesson(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = require_str(&req.params, "lessonId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM lessons WHERE id = ?", [&lesson_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "lesson not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (sql, table) in [
        ("DELETE FROM lesson_assets WHERE lesson_id = ?", "lesson_assets"),
        ("DELETE FROM lessons WHERE id = ?", "lessons"),
    ] {
        if let Err(e) = tx.execute(sql, [&lesson_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": table }),
            ));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn add_asset(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = require_str(&req.params, "lessonId")?;
    let kind = parse_kind(&ASSET_KINDS, &require_str(&req.params, "kind")?, "kind")?;
    let path = require_str(&req.params, "path")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM lessons WHERE id = ?", [&lesson_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "lesson not found"));
    }

    let asset_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lesson_assets(id, lesson_id, kind, path) VALUES(?, ?, ?, ?)",
        (&asset_id, &lesson_id, &kind, &path),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "assetId": asset_id }))
}

fn list_assets(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = require_str(&req.params, "lessonId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, kind, path FROM lesson_assets WHERE lesson_id = ? ORDER BY rowid",
        )
        .map_err(HandlerErr::db)?;
    let assets = stmt
        .query_map([&lesson_id], |row| {
            Ok(json!({
                "assetId": row.get::<_, String>(0)?,
                "kind": row.get::<_, String>(1)?,
                "path": row.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "assets": assets }))
}

fn remove_asset(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let asset_id = require_str(&req.params, "assetId")?;
    let removed = conn
        .execute("DELETE FROM lesson_assets WHERE id = ?", [&asset_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "asset not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Best scores for the lesson's linked test: the class-wide best and,
/// when a user is named, that user's personal best. No tries means 0.
fn test_summary(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = require_str(&req.params, "lessonId")?;
    let user_id = optional_str(&req.params, "userId");

    let test_id: Option<Option<String>> = conn
        .query_row(
            "SELECT test_id FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(test_id) = test_id else {
        return Err(HandlerErr::new("not_found", "lesson not found"));
    };
    let Some(test_id) = test_id else {
        return Ok(json!({ "testId": null, "bestScore": 0.0, "userBestScore": null }));
    };

    let best: f64 = conn
        .query_row(
            "SELECT COALESCE(MAX(score), 0) FROM tries WHERE test_id = ?",
            [&test_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let user_best: Option<f64> = match user_id.as_deref() {
        Some(uid) => Some(
            conn.query_row(
                "SELECT COALESCE(MAX(score), 0) FROM tries WHERE test_id = ? AND user_id = ?",
                (&test_id, uid),
                |r| r.get(0),
            )
            .map_err(HandlerErr::db)?,
        ),
        None => None,
    };

    Ok(json!({
        "testId": test_id,
        "bestScore": best,
        "userBestScore": user_best,
    }))
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
        "lessons.list" => Some(with_conn(state, req, list_lessons)),
        "lessons.create" => Some(with_conn(state, req, create_lesson)),
        "lessons.update" => Some(with_conn(state, req, update_lesson)),
        "lessons.delete" => Some(with_conn(state, req, delete_lesson)),
        "lessons.assets.add" => Some(with_conn(state, req, add_asset)),
        "lessons.assets.list" => Some(with_conn(state, req, list_assets)),
        "lessons.assets.remove" => Some(with_conn(state, req, remove_asset)),
        "lessons.testSummary" => Some(with_conn(state, req, test_summary)),
        _ => None,
    }
}
