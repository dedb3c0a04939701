use crate::exchange;
use crate::ingest::Subject;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{db_conn, optional_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ChartKind, ReportError, ReportRow, REPORT_COLUMNS};
use crate::store::{self, StoredRecord};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

fn load_records(
    conn: &Connection,
    req: &Request,
) -> Result<Vec<StoredRecord>, serde_json::Value> {
    store::list_all(conn)
        .map_err(|e| HandlerErr::from_store(e, "db_query_failed").response(&req.id))
}

/// Informational result for a report that cannot be shown.
fn unavailable(req: &Request, sources: &[String], e: &ReportError) -> serde_json::Value {
    let selected = match e {
        ReportError::EmptyPartition(s) => Some(s.clone()),
        _ => req.params.get("source").and_then(|v| v.as_str()).map(str::to_string),
    };
    log::info!("report unavailable: {}", e);
    ok(
        &req.id,
        json!({
            "status": e.status(),
            "sources": sources,
            "selectedSource": selected,
            "notice": e.to_string()
        }),
    )
}

/// Loads everything, picks the partition and flattens it.
///
/// `Err` carries the ready-made response: either a store failure or an
/// informational status.
fn partition_for_request(
    conn: &Connection,
    req: &Request,
) -> Result<(Vec<String>, String, Vec<ReportRow>), serde_json::Value> {
    let records = load_records(conn, req)?;
    let sources = report::source_options(&records);
    let requested = optional_str(req, "source");
    let source = report::select_source(&records, requested.as_deref())
        .map_err(|e| unavailable(req, &sources, &e))?;
    let rows =
        report::partition_rows(&records, &source).map_err(|e| unavailable(req, &sources, &e))?;
    Ok((sources, source, rows))
}

fn handle_sources_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match load_records(conn, req) {
        Ok(records) => ok(
            &req.id,
            json!({ "sources": report::source_options(&records) }),
        ),
        Err(e) => e,
    }
}

fn handle_report_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (sources, source, rows) = match partition_for_request(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(summary) = report::summarize(&rows) else {
        return unavailable(req, &sources, &ReportError::EmptyPartition(source));
    };

    ok(
        &req.id,
        json!({
            "status": "ready",
            "sources": sources,
            "selectedSource": source,
            "columns": REPORT_COLUMNS,
            "rows": rows,
            "summary": summary
        }),
    )
}

fn parse_chart_kind(
    req: &Request,
    defaults: &setup::ReportDefaults,
) -> Result<ChartKind, serde_json::Value> {
    let kind = optional_str(req, "kind").unwrap_or_else(|| defaults.chart.clone());
    match kind.as_str() {
        "topN" => {
            let raw_subject =
                optional_str(req, "subject").unwrap_or_else(|| defaults.subject.clone());
            let Some(subject) = Subject::parse(&raw_subject) else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "subject must be one of: Math, Science, English",
                    Some(json!({ "subject": raw_subject })),
                ));
            };
            let n = match req.params.get("n") {
                None | Some(serde_json::Value::Null) => None,
                Some(v) => match v.as_u64() {
                    Some(n) => Some(n as usize),
                    None => {
                        return Err(err(
                            &req.id,
                            "bad_params",
                            "n must be a non-negative integer",
                            Some(json!({ "n": v })),
                        ))
                    }
                },
            };
            Ok(ChartKind::TopN { subject, n })
        }
        "subjectMax" => Ok(ChartKind::SubjectMax),
        "subjectMean" => Ok(ChartKind::SubjectMean),
        other => Err(err(
            &req.id,
            "bad_params",
            "kind must be one of: topN, subjectMax, subjectMean",
            Some(json!({ "kind": other })),
        )),
    }
}

fn handle_report_chart(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let defaults = match setup::report_defaults(conn) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let kind = match parse_chart_kind(req, &defaults) {
        Ok(k) => k,
        Err(e) => return e,
    };
    let (sources, source, rows) = match partition_for_request(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut result = json!(report::chart(&rows, kind, defaults.top_n));
    result["status"] = json!("ready");
    result["sources"] = json!(sources);
    result["selectedSource"] = json!(source);
    ok(&req.id, result)
}

fn handle_report_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let records = match load_records(conn, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let sources = report::source_options(&records);
    let requested = optional_str(req, "source");
    let built = report::select_source(&records, requested.as_deref())
        .and_then(|source| report::build_report(&records, &source));
    let report = match built {
        Ok(r) => r,
        Err(e) => return unavailable(req, &sources, &e),
    };

    let out = match optional_str(req, "outPath") {
        Some(p) => PathBuf::from(p),
        None => match state.workspace.as_ref() {
            Some(ws) => exchange::default_export_path(ws, &report.source),
            None => return err(&req.id, "no_workspace", "select a workspace first", None),
        },
    };

    let written =
        exchange::export_csv(&report).and_then(|bytes| exchange::write_export(&out, &bytes));
    if let Err(e) = written {
        return err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "path": out.to_string_lossy() })),
        );
    }
    log::info!(
        "exported {} rows of {} to {}",
        report.rows.len(),
        report.source,
        out.display()
    );

    ok(
        &req.id,
        json!({
            "ok": true,
            "status": "ready",
            "selectedSource": report.source,
            "rowsExported": report.rows.len(),
            "path": out.to_string_lossy()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sources.list" => Some(handle_sources_list(state, req)),
        "report.open" => Some(handle_report_open(state, req)),
        "report.chart" => Some(handle_report_chart(state, req)),
        "report.exportCsv" => Some(handle_report_export_csv(state, req)),
        _ => None,
    }
}
