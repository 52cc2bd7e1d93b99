use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, require_str, user_role, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn list_subjects(conn: &Connection, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               s.id,
               s.name,
               (SELECT COUNT(*) FROM group_subjects gs WHERE gs.subject_id = s.id) AS assignment_count
             FROM subjects s
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    let subjects = stmt
        .query_map([], |row| {
            Ok(json!({
                "subjectId": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "assignmentCount": row.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "subjects": subjects }))
}

fn create_subject(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let name = require_str(&req.params, "name")?;
    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name) VALUES(?, ?)",
        (&subject_id, &name),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "subjectId": subject_id, "name": name }))
}

fn update_subject(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = require_str(&req.params, "subjectId")?;
    let name = require_str(
        req.params.get("patch").unwrap_or(&serde_json::Value::Null),
        "name",
    )?;
    let updated = conn
        .execute(
            "UPDATE subjects SET name = ? WHERE id = ?",
            (&name, &subject_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    Ok(json!({ "subjectId": subject_id }))
}

fn delete_subject(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = require_str(&req.params, "subjectId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Lessons ride on the assignment; they go with it.
    let steps: [(&str, &str); 4] = [
        (
            "DELETE FROM lesson_assets
             WHERE lesson_id IN (
               SELECT l.id
               FROM lessons l
               JOIN group_subjects gs ON gs.id = l.assignment_id
               WHERE gs.subject_id = ?
             )",
            "lesson_assets",
        ),
        (
            "DELETE FROM lessons
             WHERE assignment_id IN (SELECT id FROM group_subjects WHERE subject_id = ?)",
            "lessons",
        ),
        (
            "DELETE FROM group_subjects WHERE subject_id = ?",
            "group_subjects",
        ),
        ("DELETE FROM subjects WHERE id = ?", "subjects"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&subject_id]) {
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

fn assign_subject(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = require_str(&req.params, "subjectId")?;
    let group_id = require_str(&req.params, "groupId")?;
    let teacher_id = require_str(&req.params, "teacherId")?;

    let subject_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if subject_exists.is_none() {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    let group_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if group_exists.is_none() {
        return Err(HandlerErr::new("not_found", "group not found"));
    }
    match user_role(conn, &teacher_id)?.as_deref() {
        Some("teacher") => {}
        Some(_) => return Err(HandlerErr::new("bad_params", "assignee must be a teacher")),
        None => return Err(HandlerErr::new("not_found", "teacher not found")),
    }

    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM group_subjects WHERE subject_id = ? AND group_id = ?",
            (&subject_id, &group_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if taken.is_some() {
        return Err(HandlerErr::with_details(
            "conflict",
            "subject is already assigned to this group",
            json!({ "subjectId": subject_id, "groupId": group_id }),
        ));
    }

    let assignment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO group_subjects(id, teacher_id, subject_id, group_id)
         VALUES(?, ?, ?, ?)",
        (&assignment_id, &teacher_id, &subject_id, &group_id),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "assignmentId": assignment_id }))
}

fn list_assignments(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let group_id = optional_str(&req.params, "groupId");
    let teacher_id = optional_str(&req.params, "teacherId");

    let base = "SELECT gs.id, s.id, s.name, g.id, g.name, u.id, u.last_name, u.first_name
         FROM group_subjects gs
         JOIN subjects s ON s.id = gs.subject_id
         JOIN groups g ON g.id = gs.group_id
         JOIN users u ON u.id = gs.teacher_id";

    let (sql, bind): (String, Vec<String>) = match (group_id, teacher_id) {
        (Some(g), None) => (format!("{} WHERE gs.group_id = ? ORDER BY s.name", base), vec![g]),
        (None, Some(t)) => (
            format!("{} WHERE gs.teacher_id = ? ORDER BY s.name", base),
            vec![t],
        ),
        (None, None) => (format!("{} ORDER BY s.name", base), vec![]),
        (Some(_), Some(_)) => {
            return Err(HandlerErr::new(
                "bad_params",
                "pass groupId or teacherId, not both",
            ))
        }
    };

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let assignments = stmt
        .query_map(rusqlite::params_from_iter(bind), |row| {
            Ok(json!({
                "assignmentId": row.get::<_, String>(0)?,
                "subject": { "subjectId": row.get::<_, String>(1)?, "name": row.get::<_, String>(2)? },
                "group": { "groupId": row.get::<_, String>(3)?, "name": row.get::<_, String>(4)? },
                "teacher": {
                    "teacherId": row.get::<_, String>(5)?,
                    "name": format!("{}, {}", row.get::<_, String>(6)?, row.get::<_, String>(7)?),
                },
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "assignments": assignments }))
}

fn unassign_subject(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = require_str(&req.params, "assignmentId")?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM group_subjects WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let steps: [(&str, &str); 3] = [
        (
            "DELETE FROM lesson_assets
             WHERE lesson_id IN (SELECT id FROM lessons WHERE assignment_id = ?)",
            "lesson_assets",
        ),
        ("DELETE FROM lessons WHERE assignment_id = ?", "lessons"),
        ("DELETE FROM group_subjects WHERE id = ?", "group_subjects"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&assignment_id]) {
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
        "subjects.list" => Some(with_conn(state, req, list_subjects)),
        "subjects.create" => Some(with_conn(state, req, create_subject)),
        "subjects.update" => Some(with_conn(state, req, update_subject)),
        "subjects.delete" => Some(with_conn(state, req, delete_subject)),
        "subjects.assign" => Some(with_conn(state, req, assign_subject)),
        "subjects.assignments" => Some(with_conn(state, req, list_assignments)),
        "subjects.unassign" => Some(with_conn(state, req, unassign_subject)),
        _ => None,
    }
}
