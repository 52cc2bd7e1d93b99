use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{delete_user_cascade, optional_str, require_str, user_role, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.email, u.first_name, u.last_name, u.middle_name, g.id, g.name
         FROM users u
         LEFT JOIN group_members gm ON gm.student_id = u.id
         LEFT JOIN groups g ON g.id = gm.group_id
         WHERE u.role = 'student'
         ORDER BY u.last_name, u.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let group_id: Option<String> = row.get(5)?;
            let group_name: Option<String> = row.get(6)?;
            Ok(json!({
                "studentId": row.get::<_, String>(0)?,
                "email": row.get::<_, String>(1)?,
                "firstName": row.get::<_, String>(2)?,
                "lastName": row.get::<_, String>(3)?,
                "middleName": row.get::<_, Option<String>>(4)?,
                "group": group_id.map(|id| json!({ "groupId": id, "name": group_name })),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn group_exists(conn: &Connection, group_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

/// Move the student's single membership. The UNIQUE constraint on
/// group_members.student_id backs this up at the storage layer.
fn move_membership(conn: &Connection, student_id: &str, group_id: &str) -> Result<(), HandlerErr> {
    if !group_exists(conn, group_id)? {
        return Err(HandlerErr::new("not_found", "group not found"));
    }
    conn.execute("DELETE FROM group_members WHERE student_id = ?", [student_id])
        .map_err(HandlerErr::db)?;
    conn.execute(
        "INSERT INTO group_members(group_id, student_id) VALUES(?, ?)",
        (group_id, student_id),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(())
}

fn create_student(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let email = require_str(&req.params, "email")?;
    let first_name = require_str(&req.params, "firstName")?;
    let last_name = require_str(&req.params, "lastName")?;
    let middle_name = optional_str(&req.params, "middleName");
    let group_id = optional_str(&req.params, "groupId");

    let holder: Option<String> = conn
        .query_row("SELECT id FROM users WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if holder.is_some() {
        return Err(HandlerErr::with_details(
            "conflict",
            "email already in use",
            json!({ "email": email }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let student_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO users(id, email, first_name, last_name, middle_name, role)
         VALUES(?, ?, ?, ?, ?, 'student')",
        (&student_id, &email, &first_name, &last_name, &middle_name),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    if let Some(group_id) = group_id.as_deref() {
        if let Err(e) = move_membership(&tx, &student_id, group_id) {
            let _ = tx.rollback();
            return Err(e);
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "studentId": student_id }))
}

fn update_student(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = require_str(&req.params, "studentId")?;
    match user_role(conn, &student_id)?.as_deref() {
        Some("student") => {}
        _ => return Err(HandlerErr::new("not_found", "student not found")),
    }

    let patch = req
        .params
        .get("patch")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    if let Some(v) = patch.get("email").and_then(|v| v.as_str()) {
        let email = v.trim();
        if email.is_empty() {
            let _ = tx.rollback();
            return Err(HandlerErr::new("bad_params", "email must not be empty"));
        }
        let holder: Option<String> = tx
            .query_row("SELECT id FROM users WHERE email = ?", [email], |r| {
                r.get(0)
            })
            .optional()
            .map_err(HandlerErr::db)?;
        if holder.as_deref().is_some_and(|h| h != student_id) {
            let _ = tx.rollback();
            return Err(HandlerErr::with_details(
                "conflict",
                "email already in use",
                json!({ "email": email }),
            ));
        }
        tx.execute("UPDATE users SET email = ? WHERE id = ?", (email, &student_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        tx.execute(
            "UPDATE users SET first_name = ? WHERE id = ?",
            (v.trim(), &student_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        tx.execute(
            "UPDATE users SET last_name = ? WHERE id = ?",
            (v.trim(), &student_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(v) = patch.get("middleName") {
        let middle: Option<String> = v.as_str().map(|s| s.trim().to_string());
        tx.execute(
            "UPDATE users SET middle_name = ? WHERE id = ?",
            (&middle, &student_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    // groupId is tri-state: absent = keep, null = leave group, id = move.
    match req.params.get("groupId") {
        None => {}
        Some(serde_json::Value::Null) => {
            tx.execute("DELETE FROM group_members WHERE student_id = ?", [&student_id])
                .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
        }
        Some(v) => {
            let Some(group_id) = v.as_str() else {
                let _ = tx.rollback();
                return Err(HandlerErr::new("bad_params", "groupId must be string or null"));
            };
            if let Err(e) = move_membership(&tx, &student_id, group_id) {
                let _ = tx.rollback();
                return Err(e);
            }
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "studentId": student_id }))
}

fn delete_student(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = require_str(&req.params, "studentId")?;
    match user_role(conn, &student_id)?.as_deref() {
        Some("student") => {}
        _ => return Err(HandlerErr::new("not_found", "student not found")),
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Err(e) = delete_user_cascade(&tx, &student_id) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_delete_failed", e.to_string()));
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
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(with_conn(state, req, create_student)),
        "students.update" => Some(with_conn(state, req, update_student)),
        "students.delete" => Some(with_conn(state, req, delete_student)),
        _ => None,
    }
}
