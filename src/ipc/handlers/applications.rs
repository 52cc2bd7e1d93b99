use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

// Signup applications queue: created by the public form, reviewed and
// discarded by an admin who creates the real user from the data.

fn create_application(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let email = require_str(&req.params, "email")?;
    let first_name = require_str(&req.params, "firstName")?;
    let last_name = require_str(&req.params, "lastName")?;
    let middle_name = optional_str(&req.params, "middleName");
    let group_number = optional_str(&req.params, "groupNumber");

    let application_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO applications(id, email, first_name, last_name, middle_name, group_number)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &application_id,
            &email,
            &first_name,
            &last_name,
            &middle_name,
            &group_number,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "applicationId": application_id }))
}

fn list_applications(conn: &Connection, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, email, first_name, last_name, middle_name, group_number
             FROM applications
             ORDER BY rowid",
        )
        .map_err(HandlerErr::db)?;
    let applications = stmt
        .query_map([], |row| {
            Ok(json!({
                "applicationId": row.get::<_, String>(0)?,
                "email": row.get::<_, String>(1)?,
                "firstName": row.get::<_, String>(2)?,
                "lastName": row.get::<_, String>(3)?,
                "middleName": row.get::<_, Option<String>>(4)?,
                "groupNumber": row.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "applications": applications }))
}

fn get_application(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let application_id = require_str(&req.params, "applicationId")?;
    let row: Option<(String, String, String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT email, first_name, last_name, middle_name, group_number
             FROM applications WHERE id = ?",
            [&application_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((email, first_name, last_name, middle_name, group_number)) = row else {
        return Err(HandlerErr::new("not_found", "application not found"));
    };

    // The applicant types the group name free-form; flag it when it matches
    // nothing so the reviewer sees the mistake up front.
    let matched_group: Option<(String, String)> = match group_number.as_deref() {
        Some(number) => conn
            .query_row(
                "SELECT id, name FROM groups WHERE name = ?",
                [number],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(HandlerErr::db)?,
        None => None,
    };
    let group_missing = group_number.is_some() && matched_group.is_none();

    Ok(json!({
        "applicationId": application_id,
        "email": email,
        "firstName": first_name,
        "lastName": last_name,
        "middleName": middle_name,
        "groupNumber": group_number,
        "group": matched_group.map(|(id, name)| json!({ "groupId": id, "name": name })),
        "groupMissing": group_missing,
    }))
}

fn delete_application(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let application_id = require_str(&req.params, "applicationId")?;
    let deleted = conn
        .execute("DELETE FROM applications WHERE id = ?", [&application_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "application not found"));
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
        "applications.create" => Some(with_conn(state, req, create_application)),
        "applications.list" => Some(with_conn(state, req, list_applications)),
        "applications.get" => Some(with_conn(state, req, get_application)),
        "applications.delete" => Some(with_conn(state, req, delete_application)),
        _ => None,
    }
}
