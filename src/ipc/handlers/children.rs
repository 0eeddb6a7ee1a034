use crate::db;
use crate::ipc::helpers::{get_optional_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn children_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare("SELECT id, name, grade FROM children ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "grade": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "children": rows }))
}

fn children_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let grade = get_required_str(params, "grade")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO children(id, name, grade) VALUES(?, ?, ?)",
        (&id, name.trim(), grade.trim()),
    )?;
    Ok(json!({ "childId": id }))
}

// Admin correction only: children are otherwise immutable once created.
fn children_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let child_id = get_required_str(params, "childId")?;
    if !db::child_exists(conn, &child_id)? {
        return Err(HandlerErr::not_found("child not found"));
    }
    let patch = params.get("patch").cloned().unwrap_or_else(|| json!({}));
    if let Some(name) = get_optional_str(&patch, "name") {
        if name.trim().is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        conn.execute(
            "UPDATE children SET name = ? WHERE id = ?",
            (name.trim(), &child_id),
        )?;
    }
    if let Some(grade) = get_optional_str(&patch, "grade") {
        conn.execute(
            "UPDATE children SET grade = ? WHERE id = ?",
            (grade.trim(), &child_id),
        )?;
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "children.list" => Some(with_db(state, req, |c, _| children_list(c))),
        "children.create" => Some(with_db(state, req, children_create)),
        "children.update" => Some(with_db(state, req, children_update)),
        _ => None,
    }
}
