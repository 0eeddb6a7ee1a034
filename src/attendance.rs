use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::db;
use crate::escalation::{self, CoreError, EscalationPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

#[derive(Debug)]
pub struct MarkOutcome {
    pub record_id: String,
    pub escalations_created: Vec<String>,
}

/// Upserts the (child, date) attendance row, last writer wins, then runs the
/// escalation check for that child. `today` is the evaluation reference date.
pub fn mark_attendance(
    conn: &Connection,
    policy: &EscalationPolicy,
    today: NaiveDate,
    child_id: &str,
    date: &str,
    status: &str,
) -> Result<MarkOutcome, CoreError> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| CoreError::Validation("date must be YYYY-MM-DD".to_string()))?;
    let status = AttendanceStatus::parse(status).ok_or_else(|| {
        CoreError::Validation("status must be present, absent, late or excused".to_string())
    })?;
    if !db::child_exists(conn, child_id)? {
        return Err(CoreError::Validation(format!("unknown child: {}", child_id)));
    }

    let marked_absent_at = if status == AttendanceStatus::Absent {
        Some(Utc::now().to_rfc3339())
    } else {
        None
    };
    conn.execute(
        "INSERT INTO attendance_records(id, child_id, date, status, marked_absent_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(child_id, date) DO UPDATE SET
           status = excluded.status,
           marked_absent_at = excluded.marked_absent_at",
        (
            Uuid::new_v4().to_string(),
            child_id,
            date.to_string(),
            status.as_str(),
            marked_absent_at,
        ),
    )?;
    let record_id: String = conn.query_row(
        "SELECT id FROM attendance_records WHERE child_id = ? AND date = ?",
        (child_id, date.to_string()),
        |r| r.get(0),
    )?;

    let escalations_created = escalation::evaluate_child(conn, policy, today, child_id)?;
    Ok(MarkOutcome {
        record_id,
        escalations_created,
    })
}

/// No row for a date means present. A deliberate register policy: staff mark
/// exceptions, not the whole roster.
pub fn status_for_date(
    conn: &Connection,
    child_id: &str,
    date: &str,
) -> Result<AttendanceStatus, CoreError> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT status FROM attendance_records WHERE child_id = ? AND date = ?",
            (child_id, date),
            |r| r.get(0),
        )
        .optional()?;
    Ok(stored
        .as_deref()
        .and_then(AttendanceStatus::parse)
        .unwrap_or(AttendanceStatus::Present))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    fn add_child(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO children(id, name, grade) VALUES(?, ?, ?)",
            (id, "Avery Lee", "Grade 4"),
        )
        .expect("insert child");
    }

    fn today() -> NaiveDate {
        NaiveDate::parse_from_str("2026-03-18", "%Y-%m-%d").expect("test date")
    }

    #[test]
    fn repeated_marks_keep_one_row_last_writer_wins() {
        let conn = test_conn();
        add_child(&conn, "c1");
        let policy = EscalationPolicy::default();
        for status in ["absent", "late", "present"] {
            mark_attendance(&conn, &policy, today(), "c1", "2026-03-10", status).expect("mark");
        }

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM attendance_records WHERE child_id = 'c1' AND date = '2026-03-10'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(count, 1);
        assert_eq!(
            status_for_date(&conn, "c1", "2026-03-10").expect("status"),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn marked_absent_at_follows_status() {
        let conn = test_conn();
        add_child(&conn, "c1");
        let policy = EscalationPolicy::default();
        mark_attendance(&conn, &policy, today(), "c1", "2026-03-10", "absent").expect("mark");
        let stamped: Option<String> = conn
            .query_row(
                "SELECT marked_absent_at FROM attendance_records WHERE child_id = 'c1'",
                [],
                |r| r.get(0),
            )
            .expect("row");
        assert!(stamped.is_some());

        mark_attendance(&conn, &policy, today(), "c1", "2026-03-10", "present").expect("mark");
        let stamped: Option<String> = conn
            .query_row(
                "SELECT marked_absent_at FROM attendance_records WHERE child_id = 'c1'",
                [],
                |r| r.get(0),
            )
            .expect("row");
        assert!(stamped.is_none());
    }

    #[test]
    fn unmarked_date_defaults_to_present() {
        let conn = test_conn();
        add_child(&conn, "c1");
        assert_eq!(
            status_for_date(&conn, "c1", "2026-03-10").expect("status"),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn marking_rejects_bad_input() {
        let conn = test_conn();
        add_child(&conn, "c1");
        let policy = EscalationPolicy::default();

        let err = mark_attendance(&conn, &policy, today(), "ghost", "2026-03-10", "absent")
            .expect_err("unknown child");
        assert_eq!(err.code(), "bad_params");

        let err = mark_attendance(&conn, &policy, today(), "c1", "10/03/2026", "absent")
            .expect_err("bad date");
        assert_eq!(err.code(), "bad_params");

        let err = mark_attendance(&conn, &policy, today(), "c1", "2026-03-10", "tardy")
            .expect_err("bad status");
        assert_eq!(err.code(), "bad_params");
    }

    #[test]
    fn marking_the_threshold_absence_escalates() {
        let conn = test_conn();
        add_child(&conn, "c1");
        let policy = EscalationPolicy::default();

        let first =
            mark_attendance(&conn, &policy, today(), "c1", "2026-03-10", "absent").expect("mark");
        assert!(first.escalations_created.is_empty());
        let second =
            mark_attendance(&conn, &policy, today(), "c1", "2026-03-11", "absent").expect("mark");
        assert!(second.escalations_created.is_empty());
        let third =
            mark_attendance(&conn, &policy, today(), "c1", "2026-03-12", "absent").expect("mark");
        assert_eq!(third.escalations_created.len(), 1);
    }
}
