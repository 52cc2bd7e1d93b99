use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{delete_user_cascade, optional_str, require_str, user_role, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.email, u.first_name, u.last_name, u.middle_name, g.id, g.name
         FROM users u
         LEFT JOIN groups g ON g.owner_id = u.id
         WHERE u.role = 'teacher'
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
                "teacherId": row.get::<_, String>(0)?,
                "email": row.get::<_, String>(1)?,
                "firstName": row.get::<_, String>(2)?,
                "lastName": row.get::<_, String>(3)?,
                "middleName": row.get::<_, Option<String>>(4)?,
                "group": group_id.map(|id| json!({ "groupId": id, "name": group_name })),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn check_email_free(conn: &Connection, email: &str, except: Option<&str>) -> Result<(), HandlerErr> {
    let holder: Option<String> = conn
        .query_row("SELECT id FROM users WHERE email = ?", [email], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db)?;
    match holder {
        Some(id) if Some(id.as_str()) != except => Err(HandlerErr::with_details(
            "conflict",
            "email already in use",
            json!({ "email": email }),
        )),
        _ => Ok(()),
    }
}

/// Give `teacher_id` ownership of `group_id`, releasing any group they held.
/// A group that already belongs to someone else is a conflict, mirroring the
/// "group already has a teacher" admin flow.
fn assign_owned_group(conn: &Connection, teacher_id: &str, group_id: &str) -> Result<(), HandlerErr> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT name, owner_id FROM groups WHERE id = ?",
            [group_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((name, owner_id)) = row else {
        return Err(HandlerErr::new("not_found", "group not found"));
    };

    match owner_id.as_deref() {
        Some(current) if current == teacher_id => return Ok(()),
        Some(_) => {
            return Err(HandlerErr::with_details(
                "conflict",
                format!("group {} already has a teacher", name),
                json!({ "groupId": group_id }),
            ))
        }
        None => {}
    }

    conn.execute(
        "UPDATE groups SET owner_id = NULL WHERE owner_id = ?",
        [teacher_id],
    )
    .map_err(HandlerErr::db)?;
    conn.execute(
        "UPDATE groups SET owner_id = ? WHERE id = ?",
        (teacher_id, group_id),
    )
    .map_err(HandlerErr::db)?;
    Ok(())
}

fn create_teacher(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let email = require_str(&req.params, "email")?;
    let first_name = require_str(&req.params, "firstName")?;
    let last_name = require_str(&req.params, "lastName")?;
    let middle_name = optional_str(&req.params, "middleName");
    let group_id = optional_str(&req.params, "groupId");

    check_email_free(conn, &email, None)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let teacher_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO users(id, email, first_name, last_name, middle_name, role)
         VALUES(?, ?, ?, ?, ?, 'teacher')",
        (&teacher_id, &email, &first_name, &last_name, &middle_name),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    if let Some(group_id) = group_id.as_deref() {
        if let Err(e) = assign_owned_group(&tx, &teacher_id, group_id) {
            let _ = tx.rollback();
            return Err(e);
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "teacherId": teacher_id }))
}

fn update_teacher(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = require_str(&req.params, "teacherId")?;
    match user_role(conn, &teacher_id)?.as_deref() {
        Some("teacher") => {}
        _ => return Err(HandlerErr::new("not_found", "teacher not found")),
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
        if let Err(e) = check_email_free(&tx, email, Some(teacher_id.as_str())) {
            let _ = tx.rollback();
            return Err(e);
        }
        tx.execute("UPDATE users SET email = ? WHERE id = ?", (email, &teacher_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        tx.execute(
            "UPDATE users SET first_name = ? WHERE id = ?",
            (v.trim(), &teacher_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        tx.execute(
            "UPDATE users SET last_name = ? WHERE id = ?",
            (v.trim(), &teacher_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(v) = patch.get("middleName") {
        let middle: Option<String> = v.as_str().map(|s| s.trim().to_string());
        tx.execute(
            "UPDATE users SET middle_name = ? WHERE id = ?",
            (&middle, &teacher_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    // groupId is tri-state: absent = keep, null = release, id = reassign.
    match req.params.get("groupId") {
        None => {}
        Some(serde_json::Value::Null) => {
            tx.execute(
                "UPDATE groups SET owner_id = NULL WHERE owner_id = ?",
                [&teacher_id],
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
        Some(v) => {
            let Some(group_id) = v.as_str() else {
                let _ = tx.rollback();
                return Err(HandlerErr::new("bad_params", "groupId must be string or null"));
            };
            if let Err(e) = assign_owned_group(&tx, &teacher_id, group_id) {
                let _ = tx.rollback();
                return Err(e);
            }
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "teacherId": teacher_id }))
}

fn delete_teacher(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = require_str(&req.params, "teacherId")?;
    match user_role(conn, &teacher_id)?.as_deref() {
        Some("teacher") => {}
        _ => return Err(HandlerErr::new("not_found", "teacher not found")),
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Err(e) = delete_user_cascade(&tx, &teacher_id) {
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
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(with_conn(state, req, create_teacher)),
        "teachers.update" => Some(with_conn(state, req, update_teacher)),
        "teachers.delete" => Some(with_conn(state, req, delete_teacher)),
        _ => None,
    }
}
