use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, require_str, user_role, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn list_groups(conn: &Connection, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               g.id,
               g.name,
               u.id,
               u.last_name,
               u.first_name,
               (SELECT COUNT(*) FROM group_members gm WHERE gm.group_id = g.id) AS member_count
             FROM groups g
             LEFT JOIN users u ON u.id = g.owner_id
             ORDER BY g.name",
        )
        .map_err(HandlerErr::db)?;
    let groups = stmt
        .query_map([], |row| {
            let owner_id: Option<String> = row.get(2)?;
            let owner_last: Option<String> = row.get(3)?;
            let owner_first: Option<String> = row.get(4)?;
            Ok(json!({
                "groupId": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "owner": owner_id.map(|id| json!({
                    "teacherId": id,
                    "name": format!(
                        "{}, {}",
                        owner_last.unwrap_or_default(),
                        owner_first.unwrap_or_default()
                    ),
                })),
                "memberCount": row.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "groups": groups }))
}

fn check_owner_free(conn: &Connection, teacher_id: &str) -> Result<(), HandlerErr> {
    let owned: Option<String> = conn
        .query_row(
            "SELECT name FROM groups WHERE owner_id = ?",
            [teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    match owned {
        Some(name) => Err(HandlerErr::with_details(
            "conflict",
            format!("teacher already owns group {}", name),
            json!({ "teacherId": teacher_id }),
        )),
        None => Ok(()),
    }
}

fn check_is_teacher(conn: &Connection, user_id: &str) -> Result<(), HandlerErr> {
    match user_role(conn, user_id)?.as_deref() {
        Some("teacher") => Ok(()),
        Some(_) => Err(HandlerErr::new("bad_params", "owner must be a teacher")),
        None => Err(HandlerErr::new("not_found", "owner not found")),
    }
}

fn create_group(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let name = require_str(&req.params, "name")?;
    let owner_id = optional_str(&req.params, "ownerId");

    if let Some(owner_id) = owner_id.as_deref() {
        check_is_teacher(conn, owner_id)?;
        check_owner_free(conn, owner_id)?;
    }

    let group_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO groups(id, name, owner_id) VALUES(?, ?, ?)",
        (&group_id, &name, &owner_id),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "groupId": group_id, "name": name }))
}

fn update_group(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let group_id = require_str(&req.params, "groupId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "group not found"));
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
        conn.execute("UPDATE groups SET name = ? WHERE id = ?", (name, &group_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    // ownerId is tri-state: absent = keep, null = release, id = assign.
    match patch.get("ownerId") {
        None => {}
        Some(serde_json::Value::Null) => {
            conn.execute(
                "UPDATE groups SET owner_id = NULL WHERE id = ?",
                [&group_id],
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
        Some(v) => {
            let Some(owner_id) = v.as_str() else {
                return Err(HandlerErr::new("bad_params", "ownerId must be string or null"));
            };
            let current: Option<String> = conn
                .query_row(
                    "SELECT owner_id FROM groups WHERE id = ?",
                    [&group_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::db)?
                .flatten();
            if current.as_deref() != Some(owner_id) {
                check_is_teacher(conn, owner_id)?;
                check_owner_free(conn, owner_id)?;
                conn.execute(
                    "UPDATE groups SET owner_id = ? WHERE id = ?",
                    (owner_id, &group_id),
                )
                .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
            }
        }
    }

    Ok(json!({ "groupId": group_id }))
}

fn delete_group(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let group_id = require_str(&req.params, "groupId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "group not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let steps: [(&str, &str); 5] = [
        (
            "DELETE FROM lesson_assets
             WHERE lesson_id IN (
               SELECT l.id
               FROM lessons l
               JOIN group_subjects gs ON gs.id = l.assignment_id
               WHERE gs.group_id = ?
             )",
            "lesson_assets",
        ),
        (
            "DELETE FROM lessons
             WHERE assignment_id IN (SELECT id FROM group_subjects WHERE group_id = ?)",
            "lessons",
        ),
        ("DELETE FROM group_subjects WHERE group_id = ?", "group_subjects"),
        ("DELETE FROM group_members WHERE group_id = ?", "group_members"),
        ("DELETE FROM groups WHERE id = ?", "groups"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&group_id]) {
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

fn member_rows(conn: &Connection, group_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT u.id, u.email, u.first_name, u.last_name, u.middle_name
             FROM group_members gm
             JOIN users u ON u.id = gm.student_id
             WHERE gm.group_id = ?
             ORDER BY u.last_name, u.first_name",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([group_id], |row| {
        Ok(json!({
            "studentId": row.get::<_, String>(0)?,
            "email": row.get::<_, String>(1)?,
            "firstName": row.get::<_, String>(2)?,
            "lastName": row.get::<_, String>(3)?,
            "middleName": row.get::<_, Option<String>>(4)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn group_members(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let group_id = require_str(&req.params, "groupId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "group not found"));
    }
    Ok(json!({ "members": member_rows(conn, &group_id)? }))
}

fn owned_group(conn: &Connection, teacher_id: &str) -> Result<Option<(String, String)>, HandlerErr> {
    conn.query_row(
        "SELECT id, name FROM groups WHERE owner_id = ?",
        [teacher_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
    .map_err(HandlerErr::db)
}

fn my_group(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(actor_id) = req.actor.as_deref() else {
        return Err(HandlerErr::new("bad_params", "missing actor"));
    };
    let Some((group_id, name)) = owned_group(conn, actor_id)? else {
        return Ok(json!({ "group": null, "members": [] }));
    };
    Ok(json!({
        "group": { "groupId": group_id, "name": name },
        "members": member_rows(conn, &group_id)?,
    }))
}

fn remove_student(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(actor_id) = req.actor.as_deref() else {
        return Err(HandlerErr::new("bad_params", "missing actor"));
    };
    let student_id = require_str(&req.params, "studentId")?;
    let Some((group_id, _)) = owned_group(conn, actor_id)? else {
        return Err(HandlerErr::new("not_found", "you do not own a group"));
    };
    let removed = conn
        .execute(
            "DELETE FROM group_members WHERE group_id = ? AND student_id = ?",
            (&group_id, &student_id),
        )
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "student is not in your group"));
    }
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
        "groups.list" => Some(with_conn(state, req, list_groups)),
        "groups.create" => Some(with_conn(state, req, create_group)),
        "groups.update" => Some(with_conn(state, req, update_group)),
        "groups.delete" => Some(with_conn(state, req, delete_group)),
        "groups.members" => Some(with_conn(state, req, group_members)),
        "groups.mine" => Some(with_conn(state, req, my_group)),
        "groups.removeStudent" => Some(with_conn(state, req, remove_student)),
        _ => None,
    }
}
