use crate::attendance;
use crate::escalation;
use crate::ipc::handlers::escalations::open_escalation_rows;
use crate::ipc::helpers::{get_required_str, reference_date, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let child_id = get_required_str(params, "childId")?;
    let date = get_required_str(params, "date")?;
    let status = get_required_str(params, "status")?;
    let today = reference_date(params)?;

    let policy = escalation::load_policy(conn)?;
    let outcome = attendance::mark_attendance(conn, &policy, today, &child_id, &date, &status)?;
    Ok(json!({
        "recordId": outcome.record_id,
        "escalationsCreated": outcome.escalations_created,
    }))
}

/// Register view for one date: full roster with effective statuses plus the
/// open escalation list, the way the register screen loads.
fn attendance_day_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_str(params, "date")?;
    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return Err(HandlerErr::bad_params("date must be YYYY-MM-DD"));
    }

    let mut stmt = conn.prepare("SELECT id, name, grade FROM children ORDER BY name")?;
    let roster = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut children = Vec::with_capacity(roster.len());
    let mut absent_count = 0usize;
    for (id, name, grade) in &roster {
        let status = attendance::status_for_date(conn, id, &date)?;
        if status == attendance::AttendanceStatus::Absent {
            absent_count += 1;
        }
        children.push(json!({
            "id": id,
            "name": name,
            "grade": grade,
            "status": status.as_str(),
        }));
    }

    Ok(json!({
        "date": date,
        "children": children,
        "presentCount": roster.len() - absent_count,
        "absentCount": absent_count,
        "escalations": open_escalation_rows(conn)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_db(state, req, attendance_mark)),
        "attendance.dayOpen" => Some(with_db(state, req, attendance_day_open)),
        _ => None,
    }
}
