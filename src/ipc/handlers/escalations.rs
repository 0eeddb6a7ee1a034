use crate::escalation;
use crate::ipc::helpers::{get_optional_str, get_required_str, reference_date, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn escalation_rows(
    conn: &Connection,
    include_resolved: bool,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let sql = format!(
        "SELECT e.id, e.child_id, c.name, c.grade, e.escalation_type, e.absence_count,
                e.period_start, e.period_end, e.escalated_at, e.resolved, e.resolved_at
         FROM escalations e
         JOIN children c ON c.id = e.child_id
         {}
         ORDER BY e.escalated_at DESC",
        if include_resolved {
            ""
        } else {
            "WHERE e.resolved = 0"
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "childId": r.get::<_, String>(1)?,
                "childName": r.get::<_, String>(2)?,
                "grade": r.get::<_, String>(3)?,
                "escalationType": r.get::<_, String>(4)?,
                "absenceCount": r.get::<_, i64>(5)?,
                "periodStart": r.get::<_, String>(6)?,
                "periodEnd": r.get::<_, String>(7)?,
                "escalatedAt": r.get::<_, String>(8)?,
                "resolved": r.get::<_, i64>(9)? != 0,
                "resolvedAt": r.get::<_, Option<String>>(10)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn open_escalation_rows(conn: &Connection) -> Result<Vec<serde_json::Value>, HandlerErr> {
    escalation_rows(conn, false)
}

fn escalations_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let include_resolved = params
        .get("includeResolved")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Ok(json!({ "escalations": escalation_rows(conn, include_resolved)? }))
}

fn escalations_evaluate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let today = reference_date(params)?;
    let policy = escalation::load_policy(conn)?;

    match get_optional_str(params, "childId") {
        Some(child_id) => {
            let created = escalation::evaluate_child(conn, &policy, today, &child_id)?;
            Ok(json!({ "created": created }))
        }
        None => {
            let outcome = escalation::evaluate_all(conn, &policy, today)?;
            let failures: Vec<serde_json::Value> = outcome
                .failures
                .iter()
                .map(|f| {
                    json!({
                        "childId": f.child_id,
                        "code": f.code,
                        "message": f.message,
                    })
                })
                .collect();
            Ok(json!({
                "evaluated": outcome.evaluated,
                "created": outcome.created,
                "failures": failures,
            }))
        }
    }
}

fn escalations_resolve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let escalation_id = get_required_str(params, "escalationId")?;
    let newly_resolved = escalation::resolve(conn, &escalation_id)?;
    Ok(json!({
        "resolved": true,
        "alreadyResolved": !newly_resolved,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "escalations.list" => Some(with_db(state, req, escalations_list)),
        "escalations.evaluate" => Some(with_db(state, req, escalations_evaluate)),
        "escalations.resolve" => Some(with_db(state, req, escalations_resolve)),
        _ => None,
    }
}
