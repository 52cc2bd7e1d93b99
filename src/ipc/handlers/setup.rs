use crate::auth::Role;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::menu;
use serde_json::{json, Value};

const SETTINGS_KEY: &str = "workspace";

fn default_settings() -> Value {
    json!({
        "schoolName": "",
        "academicYear": "",
        "language": "en"
    })
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merged_settings(conn: &rusqlite::Connection) -> anyhow::Result<Value> {
    let mut settings = default_settings();
    if let Some(stored) = db::settings_get_json(conn, SETTINGS_KEY)? {
        if let (Some(out), Some(obj)) = (settings.as_object_mut(), stored.as_object()) {
            for (k, v) in obj {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(settings)
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match merged_settings(conn) {
        Ok(settings) => ok(&req.id, json!({ "settings": settings })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let mut settings = match merged_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(out) = settings.as_object_mut() else {
        return err(&req.id, "db_query_failed", "stored settings must be an object", None);
    };

    for (key, value) in patch {
        let parsed = match key.as_str() {
            "schoolName" => parse_string_max(value, key, 128).map(Value::String),
            "academicYear" => parse_string_max(value, key, 16).map(Value::String),
            "language" => parse_string_max(value, key, 8).map(Value::String),
            _ => Err(format!("unknown settings key: {}", key)),
        };
        match parsed {
            Ok(v) => {
                out.insert(key.clone(), v);
            }
            Err(message) => return err(&req.id, "bad_params", message, None),
        }
    }

    if let Err(e) = db::settings_set_json(conn, SETTINGS_KEY, &settings) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "settings": settings }))
}

fn handle_menu_get(req: &Request, role: Option<Role>) -> serde_json::Value {
    // The policy gate guarantees an actor; the role drives the menu shape.
    let Some(role) = role else {
        return err(&req.id, "forbidden", "menu requires an authenticated actor", None);
    };
    let sections = menu::menu_for_role(role);
    ok(
        &req.id,
        json!({
            "role": role.as_str(),
            "menu": serde_json::to_value(sections).unwrap_or_else(|_| json!([])),
        }),
    )
}

pub fn try_handle(
    state: &mut AppState,
    req: &Request,
    role: Option<Role>,
) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "menu.get" => Some(handle_menu_get(req, role)),
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
