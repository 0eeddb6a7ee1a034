use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    child_id: &str,
    date: &str,
    status: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "attendance.mark",
        json!({
            "childId": child_id,
            "date": date,
            "status": status,
            "asOf": "2026-03-18"
        }),
    )
}

#[test]
fn marking_crosses_monthly_threshold_exactly_once() {
    let workspace = temp_dir("rollcall-threshold-flow");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "children.create",
        json!({ "name": "Avery Lee", "grade": "Grade 4" }),
    );
    let child_id = created
        .get("childId")
        .and_then(|v| v.as_str())
        .expect("childId")
        .to_string();

    // threshold - 1 absences: no escalation yet.
    let first = mark(&mut stdin, &mut reader, "m1", &child_id, "2026-03-10", "absent");
    assert_eq!(
        first
            .get("escalationsCreated")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
    mark(&mut stdin, &mut reader, "m2", &child_id, "2026-03-11", "absent");
    // late and excused days never count toward the threshold
    mark(&mut stdin, &mut reader, "m3", &child_id, "2026-03-13", "late");
    mark(&mut stdin, &mut reader, "m4", &child_id, "2026-03-16", "excused");

    let listed = request_ok(&mut stdin, &mut reader, "l1", "escalations.list", json!({}));
    assert_eq!(
        listed
            .get("escalations")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // The third absence crosses the default monthly threshold.
    let third = mark(&mut stdin, &mut reader, "m5", &child_id, "2026-03-12", "absent");
    assert_eq!(
        third
            .get("escalationsCreated")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let listed = request_ok(&mut stdin, &mut reader, "l2", "escalations.list", json!({}));
    let rows = listed
        .get("escalations")
        .and_then(|v| v.as_array())
        .expect("escalations");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(
        row.get("escalationType").and_then(|v| v.as_str()),
        Some("monthly")
    );
    assert_eq!(row.get("absenceCount").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(
        row.get("periodStart").and_then(|v| v.as_str()),
        Some("2026-03-01")
    );
    assert_eq!(
        row.get("periodEnd").and_then(|v| v.as_str()),
        Some("2026-03-18")
    );
    assert_eq!(
        row.get("childName").and_then(|v| v.as_str()),
        Some("Avery Lee")
    );
    assert_eq!(row.get("resolved").and_then(|v| v.as_bool()), Some(false));

    // Re-running the evaluator with no new data creates nothing.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "escalations.evaluate",
        json!({ "childId": child_id, "asOf": "2026-03-18" }),
    );
    assert_eq!(
        again
            .get("created")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn sweep_reports_created_ids_per_configured_policy() {
    let workspace = temp_dir("rollcall-sweep-policy");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    // Tighter policy with a January year start.
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "settings.update",
        json!({ "monthlyThreshold": 2, "annualThreshold": 4, "yearStartMonth": 1 }),
    );

    let mut child_ids = Vec::new();
    for (i, name) in ["Avery Lee", "Briar Quinn"].iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "children.create",
            json!({ "name": name, "grade": "Grade 4" }),
        );
        child_ids.push(
            created
                .get("childId")
                .and_then(|v| v.as_str())
                .expect("childId")
                .to_string(),
        );
    }

    // February absences for the first child feed the annual count only; the
    // March monthly window never sees them.
    for (i, date) in ["2026-02-03", "2026-02-04"].iter().enumerate() {
        mark(&mut stdin, &mut reader, &format!("f{}", i), &child_ids[0], date, "absent");
    }

    for (i, child_id) in child_ids.iter().enumerate() {
        for (j, date) in ["2026-03-10", "2026-03-11"].iter().enumerate() {
            let _ = mark(
                &mut stdin,
                &mut reader,
                &format!("m{}-{}", i, j),
                child_id,
                date,
                "absent",
            );
        }
    }

    let swept = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "escalations.evaluate",
        json!({ "asOf": "2026-03-18" }),
    );
    assert_eq!(swept.get("evaluated").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        swept
            .get("failures")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // After marking plus the sweep: each child has an open monthly, and the
    // first child an open annual (4 absences since Jan 1).
    let listed = request_ok(&mut stdin, &mut reader, "l1", "escalations.list", json!({}));
    let rows = listed
        .get("escalations")
        .and_then(|v| v.as_array())
        .expect("escalations");
    let monthly = rows
        .iter()
        .filter(|r| r.get("escalationType").and_then(|v| v.as_str()) == Some("monthly"))
        .count();
    let annual = rows
        .iter()
        .filter(|r| r.get("escalationType").and_then(|v| v.as_str()) == Some("annual"))
        .count();
    assert_eq!(monthly, 2);
    assert_eq!(annual, 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
