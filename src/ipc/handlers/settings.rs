use crate::escalation;
use crate::ipc::helpers::{with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn policy_json(policy: &escalation::EscalationPolicy) -> serde_json::Value {
    json!({
        "monthlyThreshold": policy.monthly_threshold,
        "annualThreshold": policy.annual_threshold,
        "yearStartMonth": policy.year_start_month,
    })
}

fn settings_get(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let policy = escalation::load_policy(conn)?;
    Ok(policy_json(&policy))
}

fn settings_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut policy = escalation::load_policy(conn)?;
    if let Some(n) = params.get("monthlyThreshold").and_then(|v| v.as_i64()) {
        if n < 1 {
            return Err(HandlerErr::bad_params("monthlyThreshold must be >= 1"));
        }
        policy.monthly_threshold = n;
    }
    if let Some(n) = params.get("annualThreshold").and_then(|v| v.as_i64()) {
        if n < 1 {
            return Err(HandlerErr::bad_params("annualThreshold must be >= 1"));
        }
        policy.annual_threshold = n;
    }
    if let Some(n) = params.get("yearStartMonth").and_then(|v| v.as_u64()) {
        if !(1..=12).contains(&n) {
            return Err(HandlerErr::bad_params(
                "yearStartMonth must be between 1 and 12",
            ));
        }
        policy.year_start_month = n as u32;
    }
    escalation::save_policy(conn, &policy)?;
    Ok(policy_json(&policy))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(with_db(state, req, |c, _| settings_get(c))),
        "settings.update" => Some(with_db(state, req, settings_update)),
        _ => None,
    }
}
