use super::handlers;
use super::types::{AppState, Request};
use crate::auth::{self, Role};
use crate::ipc::error::{err, forbidden};
use rusqlite::OptionalExtension;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let role = match resolve_actor_role(state, &req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let decision = auth::authorize(role, &req.method);
    if !decision.allowed {
        return forbidden(&req.id, decision.reason);
    }

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::teachers::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::applications::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::groups::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::subjects::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::lessons::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::tests::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::attempts::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::setup::try_handle(state, &req, role) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

fn resolve_actor_role(
    state: &AppState,
    req: &Request,
) -> Result<Option<Role>, serde_json::Value> {
    let Some(actor_id) = req.actor.as_deref() else {
        return Ok(None);
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [actor_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let Some(role) = role else {
        return Err(forbidden(&req.id, "unknown actor"));
    };
    match Role::parse(&role) {
        Some(r) => Ok(Some(r)),
        None => Err(forbidden(
            &req.id,
            format!("actor has unrecognized role: {}", role),
        )),
    }
}
