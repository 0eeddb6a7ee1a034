use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rollcall.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS children(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_children_name ON children(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'present',
            marked_absent_at TEXT,
            FOREIGN KEY(child_id) REFERENCES children(id),
            UNIQUE(child_id, date)
        )",
        [],
    )?;

    // Workspaces written before the four-state status existed carry a boolean
    // is_present column instead. Fold it into status once.
    ensure_attendance_status(conn)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_child ON attendance_records(child_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_child_date ON attendance_records(child_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS escalations(
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL,
            escalation_type TEXT NOT NULL,
            absence_count INTEGER NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            escalated_at TEXT NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolved_at TEXT,
            FOREIGN KEY(child_id) REFERENCES children(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_escalations_child ON escalations(child_id)",
        [],
    )?;
    // At most one open escalation per (child, type). Concurrent evaluators
    // both passing the read-side duplicate check land here; the second insert
    // is ignored.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_escalations_open_unique
         ON escalations(child_id, escalation_type) WHERE resolved = 0",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_attendance_status(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "attendance_records", "is_present")? {
        return Ok(());
    }
    // The presence of status means the fold already ran; the stale is_present
    // column stays behind but is never written again. Re-running the UPDATE
    // would clobber rows marked since (their is_present is NULL, which the
    // CASE maps to 'present').
    if table_has_column(conn, "attendance_records", "status")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance_records ADD COLUMN status TEXT NOT NULL DEFAULT 'present'",
        [],
    )?;
    conn.execute(
        "UPDATE attendance_records
         SET status = CASE WHEN is_present = 0 THEN 'absent' ELSE 'present' END",
        [],
    )?;
    Ok(())
}

pub fn child_exists(conn: &Connection, child_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM children WHERE id = ?", [child_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
