mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{db_path, request_err, request_ok, select_workspace, spawn_sidecar, temp_dir};

fn create(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
    scores: [f64; 3],
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("create-{}", name),
        "students.create",
        json!({
            "name": name,
            "marks": { "Math": scores[0], "Science": scores[1], "English": scores[2] }
        }),
    );
    created["studentId"].as_str().expect("studentId").to_string()
}

fn as_f64(v: &serde_json::Value) -> f64 {
    v.as_f64().expect("number")
}

#[test]
fn single_record_report_and_pooled_statistics() {
    let workspace = temp_dir("marktrack-report-pooled");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, workspace.path());

    let alice = create(&mut stdin, &mut reader, "Alice", [80.0, 90.0, 70.0]);
    let report = request_ok(&mut stdin, &mut reader, "1", "report.open", json!({}));
    assert_eq!(report["status"], "ready");
    assert_eq!(report["selectedSource"], "manual");
    assert_eq!(
        report["columns"],
        json!(["name", "Math", "Science", "English", "average", "source"])
    );
    assert_eq!(report["rows"][0]["average"].as_f64(), Some(80.0));
    let summary = &report["summary"];
    assert_eq!(summary["totalStudents"], 1);
    assert_eq!(as_f64(&summary["overallAverage"]), 80.0);
    assert_eq!(as_f64(&summary["overallMax"]), 90.0);
    assert_eq!(as_f64(&summary["overallMin"]), 70.0);
    assert_eq!(summary["topScorer"]["id"], alice.as_str());
    assert_eq!(summary["topScorer"]["name"], "Alice");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.delete",
        json!({ "studentId": alice }),
    );
    let _ = create(&mut stdin, &mut reader, "Hi", [90.0, 80.0, 70.0]);
    let _ = create(&mut stdin, &mut reader, "Lo", [40.0, 50.0, 60.0]);
    let report = request_ok(&mut stdin, &mut reader, "3", "report.open", json!({}));
    let summary = &report["summary"];
    assert_eq!(summary["totalStudents"], 2);
    assert_eq!(as_f64(&summary["overallAverage"]), 65.0);
    assert_eq!(as_f64(&summary["overallMax"]), 90.0);
    assert_eq!(as_f64(&summary["overallMin"]), 40.0);
    assert_eq!(summary["topScorer"]["name"], "Hi");
}

#[test]
fn top_n_chart_follows_request_and_setup_defaults() {
    let workspace = temp_dir("marktrack-report-topn");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, workspace.path());

    for (name, math) in [
        ("A", 10.0),
        ("B", 50.0),
        ("C", 30.0),
        ("D", 90.0),
        ("E", 70.0),
        ("F", 20.0),
    ] {
        let _ = create(&mut stdin, &mut reader, name, [math, 0.0, 0.0]);
    }

    let chart = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "report.chart",
        json!({ "kind": "topN", "subject": "Math", "n": 3 }),
    );
    assert_eq!(chart["kind"], "topN");
    assert_eq!(chart["n"], 3);
    let scores: Vec<f64> = chart["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| as_f64(&e["score"]))
        .collect();
    assert_eq!(scores, vec![50.0, 70.0, 90.0]);

    // Out-of-range requests are clamped to [3, total].
    let low = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "report.chart",
        json!({ "kind": "topN", "n": 1 }),
    );
    assert_eq!(low["n"], 3);
    let high = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "report.chart",
        json!({ "kind": "topN", "n": 100 }),
    );
    assert_eq!(high["n"], 6);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({
            "section": "reports",
            "patch": { "topNDefault": 4, "defaultSubject": "science" }
        }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "5", "setup.get", json!({}));
    assert_eq!(
        setup.pointer("/reports/topNDefault").and_then(|v| v.as_i64()),
        Some(4)
    );
    assert_eq!(
        setup.pointer("/reports/defaultSubject").and_then(|v| v.as_str()),
        Some("Science")
    );
    let defaulted = request_ok(&mut stdin, &mut reader, "6", "report.chart", json!({}));
    assert_eq!(defaulted["kind"], "topN");
    assert_eq!(defaulted["subject"], "Science");
    assert_eq!(defaulted["n"], 4);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "7",
            "setup.update",
            json!({ "section": "reports", "patch": { "topNDefault": 2 } }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "8",
            "report.chart",
            json!({ "kind": "radar" }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "9",
            "report.chart",
            json!({ "kind": "topN", "subject": "History" }),
        ),
        "bad_params"
    );
}

#[test]
fn subject_charts_summarize_the_partition() {
    let workspace = temp_dir("marktrack-report-subjects");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, workspace.path());

    let _ = create(&mut stdin, &mut reader, "A", [60.0, 20.0, 20.0]);
    let _ = create(&mut stdin, &mut reader, "B", [40.0, 30.0, 30.0]);

    let maxima = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "report.chart",
        json!({ "kind": "subjectMax" }),
    );
    assert_eq!(maxima["kind"], "subjectMax");
    assert_eq!(
        maxima["points"],
        json!([
            { "subject": "Math", "value": 60.0 },
            { "subject": "Science", "value": 30.0 },
            { "subject": "English", "value": 30.0 }
        ])
    );

    let means = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "report.chart",
        json!({ "kind": "subjectMean" }),
    );
    let shares: Vec<f64> = means["slices"]
        .as_array()
        .expect("slices")
        .iter()
        .map(|s| as_f64(&s["sharePercent"]))
        .collect();
    assert_eq!(shares, vec![50.0, 25.0, 25.0]);
}

#[test]
fn unavailable_reports_carry_a_status_instead_of_failing() {
    let workspace = temp_dir("marktrack-report-status");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, workspace.path());

    let empty = request_ok(&mut stdin, &mut reader, "1", "report.open", json!({}));
    assert_eq!(empty["status"], "empty_store");
    let empty_chart = request_ok(&mut stdin, &mut reader, "2", "report.chart", json!({}));
    assert_eq!(empty_chart["status"], "empty_store");

    let _ = create(&mut stdin, &mut reader, "Alice", [80.0, 90.0, 70.0]);
    let missing = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "report.open",
        json!({ "source": "nowhere.csv" }),
    );
    assert_eq!(missing["status"], "empty_partition");
    assert_eq!(missing["selectedSource"], "nowhere.csv");
    assert_eq!(missing["sources"], json!(["manual"]));

    // A row written by another tool with no name blocks only its own partition.
    let conn = rusqlite::Connection::open(db_path(workspace.path())).expect("open db");
    conn.execute(
        "INSERT INTO students(id, name, marks, source) VALUES('legacy-1', NULL, ?, 'legacy.csv')",
        [r#"{"Math": 10, "Science": 20, "English": 30}"#],
    )
    .expect("insert nameless row");
    drop(conn);

    let incomplete = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "report.open",
        json!({ "source": "legacy.csv" }),
    );
    assert_eq!(incomplete["status"], "incomplete");
    assert!(incomplete["notice"]
        .as_str()
        .is_some_and(|n| n.contains("name")));
    let manual = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "report.open",
        json!({ "source": "manual" }),
    );
    assert_eq!(manual["status"], "ready");

    let sources = request_ok(&mut stdin, &mut reader, "6", "sources.list", json!({}));
    assert_eq!(sources["sources"], json!(["legacy.csv", "manual"]));
}
