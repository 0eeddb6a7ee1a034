use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::db;

const POLICY_KEY: &str = "escalation.policy";

#[derive(Debug)]
pub enum CoreError {
    Validation(String),
    NotFound(String),
    Store(String),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "bad_params",
            CoreError::NotFound(_) => "not_found",
            CoreError::Store(_) => "store_unavailable",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CoreError::Validation(m) | CoreError::NotFound(m) | CoreError::Store(m) => m,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Store(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKind {
    Monthly,
    Annual,
}

impl PeriodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodKind::Monthly => "monthly",
            PeriodKind::Annual => "annual",
        }
    }
}

/// Absence policy: two independent thresholds evaluated over two period
/// shapes. The year boundary is a school decision, not a calendar constant.
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    pub monthly_threshold: i64,
    pub annual_threshold: i64,
    pub year_start_month: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        EscalationPolicy {
            monthly_threshold: 3,
            annual_threshold: 10,
            year_start_month: 9,
        }
    }
}

impl EscalationPolicy {
    pub fn threshold(&self, kind: PeriodKind) -> i64 {
        match kind {
            PeriodKind::Monthly => self.monthly_threshold,
            PeriodKind::Annual => self.annual_threshold,
        }
    }
}

pub fn load_policy(conn: &Connection) -> Result<EscalationPolicy, CoreError> {
    let mut policy = EscalationPolicy::default();
    let saved =
        db::settings_get_json(conn, POLICY_KEY).map_err(|e| CoreError::Store(e.to_string()))?;
    if let Some(v) = saved {
        if let Some(n) = v.get("monthlyThreshold").and_then(|x| x.as_i64()) {
            policy.monthly_threshold = n.max(1);
        }
        if let Some(n) = v.get("annualThreshold").and_then(|x| x.as_i64()) {
            policy.annual_threshold = n.max(1);
        }
        if let Some(n) = v.get("yearStartMonth").and_then(|x| x.as_u64()) {
            if (1..=12).contains(&n) {
                policy.year_start_month = n as u32;
            }
        }
    }
    Ok(policy)
}

pub fn save_policy(conn: &Connection, policy: &EscalationPolicy) -> Result<(), CoreError> {
    let value = serde_json::json!({
        "monthlyThreshold": policy.monthly_threshold,
        "annualThreshold": policy.annual_threshold,
        "yearStartMonth": policy.year_start_month,
    });
    db::settings_set_json(conn, POLICY_KEY, &value).map_err(|e| CoreError::Store(e.to_string()))
}

/// Both periods run up to and including the reference date. The annual period
/// starts on day 1 of the most recent occurrence of the configured start
/// month.
pub fn period_bounds(
    kind: PeriodKind,
    today: NaiveDate,
    year_start_month: u32,
) -> Option<(NaiveDate, NaiveDate)> {
    let start = match kind {
        PeriodKind::Monthly => NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?,
        PeriodKind::Annual => {
            let year = if today.month() >= year_start_month {
                today.year()
            } else {
                today.year() - 1
            };
            NaiveDate::from_ymd_opt(year, year_start_month, 1)?
        }
    };
    Some((start, today))
}

fn count_absences(
    conn: &Connection,
    child_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<i64, CoreError> {
    // Only explicit absent rows count. A missing row for a date means the
    // child was present that day.
    conn.query_row(
        "SELECT COUNT(*) FROM attendance_records
         WHERE child_id = ? AND status = 'absent' AND date >= ? AND date <= ?",
        (child_id, start.to_string(), end.to_string()),
        |r| r.get(0),
    )
    .map_err(Into::into)
}

fn open_escalation_overlaps(
    conn: &Connection,
    child_id: &str,
    kind: PeriodKind,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<bool, CoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM escalations
             WHERE child_id = ? AND escalation_type = ? AND resolved = 0
               AND period_start <= ? AND period_end >= ?
             LIMIT 1",
            (child_id, kind.as_str(), end.to_string(), start.to_string()),
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Checks both period types for one child and materializes any escalation
/// that is newly due. Creates only; an open escalation's count is never
/// updated even if absences keep accruing.
pub fn evaluate_child(
    conn: &Connection,
    policy: &EscalationPolicy,
    today: NaiveDate,
    child_id: &str,
) -> Result<Vec<String>, CoreError> {
    if !db::child_exists(conn, child_id)? {
        return Err(CoreError::Validation(format!("unknown child: {}", child_id)));
    }

    let mut created = Vec::new();
    for kind in [PeriodKind::Monthly, PeriodKind::Annual] {
        let (start, end) = period_bounds(kind, today, policy.year_start_month).ok_or_else(|| {
            CoreError::Validation("year start month must be between 1 and 12".to_string())
        })?;
        let count = count_absences(conn, child_id, start, end)?;
        if count < policy.threshold(kind) {
            continue;
        }
        if open_escalation_overlaps(conn, child_id, kind, start, end)? {
            continue;
        }
        let id = Uuid::new_v4().to_string();
        // OR IGNORE: the open-escalation unique index absorbs the
        // read-then-write race between two evaluators.
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO escalations(
                id, child_id, escalation_type, absence_count,
                period_start, period_end, escalated_at, resolved
             ) VALUES(?, ?, ?, ?, ?, ?, ?, 0)",
            (
                &id,
                child_id,
                kind.as_str(),
                count,
                start.to_string(),
                end.to_string(),
                Utc::now().to_rfc3339(),
            ),
        )?;
        if inserted > 0 {
            created.push(id);
        }
    }
    Ok(created)
}

#[derive(Debug)]
pub struct SweepFailure {
    pub child_id: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub evaluated: usize,
    pub created: Vec<String>,
    pub failures: Vec<SweepFailure>,
}

/// Full sweep across every child. One child's store failure is reported in
/// the outcome and does not stop the rest of the sweep.
pub fn evaluate_all(
    conn: &Connection,
    policy: &EscalationPolicy,
    today: NaiveDate,
) -> Result<SweepOutcome, CoreError> {
    let mut stmt = conn.prepare("SELECT id FROM children ORDER BY name")?;
    let child_ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut outcome = SweepOutcome::default();
    for child_id in child_ids {
        outcome.evaluated += 1;
        match evaluate_child(conn, policy, today, &child_id) {
            Ok(mut ids) => outcome.created.append(&mut ids),
            Err(e) => outcome.failures.push(SweepFailure {
                message: e.message().to_string(),
                code: e.code(),
                child_id,
            }),
        }
    }
    Ok(outcome)
}

/// Returns true when this call performed the resolve, false when the
/// escalation was already resolved (a no-op success, so two staff members
/// resolving concurrently both see success and resolved_at keeps the first
/// caller's time).
pub fn resolve(conn: &Connection, escalation_id: &str) -> Result<bool, CoreError> {
    let updated = conn.execute(
        "UPDATE escalations SET resolved = 1, resolved_at = ?
         WHERE id = ? AND resolved = 0",
        (Utc::now().to_rfc3339(), escalation_id),
    )?;
    if updated > 0 {
        return Ok(true);
    }
    let exists = conn
        .query_row(
            "SELECT 1 FROM escalations WHERE id = ?",
            [escalation_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if exists {
        Ok(false)
    } else {
        Err(CoreError::NotFound(format!(
            "unknown escalation: {}",
            escalation_id
        )))
    }
}
