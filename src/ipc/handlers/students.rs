use crate::exchange;
use crate::ingest::{self, NewRecord, RawMarks, RawRow, RowOutcome, MANUAL_SOURCE};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{db_conn, optional_str, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;
use std::path::PathBuf;

/// Form input through the same normalizer as imports: scores must be numbers
/// in [0,100], absent subjects count as 0.
fn parse_record(req: &Request) -> Result<NewRecord, serde_json::Value> {
    let name = required_str(req, "name")?;
    let Some(obj) = req.params.get("marks").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "marks must be an object", None));
    };
    let row = RawRow {
        name: Some(name),
        marks: Some(RawMarks::Structured(obj.clone())),
    };
    match ingest::normalize_row(row, MANUAL_SOURCE) {
        Ok(RowOutcome::Record(rec)) => Ok(rec),
        Ok(RowOutcome::Skipped) => Err(err(
            &req.id,
            "bad_params",
            "name must not be empty",
            None,
        )),
        Err(e) => Err(err(
            &req.id,
            "bad_params",
            e.to_string(),
            Some(json!({ "marks": obj })),
        )),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match store::list_all(conn) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => HandlerErr::from_store(e, "db_query_failed").response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let rec = match parse_record(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match store::create(conn, &rec) {
        Ok(student_id) => {
            log::info!("student {} created ({})", student_id, rec.source);
            ok(
                &req.id,
                json!({
                    "studentId": student_id,
                    "name": rec.name,
                    "marks": rec.marks,
                    "average": rec.marks.average(),
                    "source": rec.source
                }),
            )
        }
        Err(e) => HandlerErr::from_store(e, "db_insert_failed").response(&req.id),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rec = match parse_record(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = store::update(conn, &student_id, &rec.name, &rec.marks) {
        return HandlerErr::from_store(e, "db_update_failed").response(&req.id);
    }
    log::info!("student {} updated", student_id);

    match store::find(conn, &student_id) {
        Ok(student) => ok(
            &req.id,
            json!({ "ok": true, "studentId": student_id, "student": student }),
        ),
        Err(e) => HandlerErr::from_store(e, "db_query_failed").response(&req.id),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match store::delete(conn, &student_id) {
        Ok(()) => {
            log::info!("student {} deleted", student_id);
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => HandlerErr::from_store(e, "db_delete_failed").response(&req.id),
    }
}

fn handle_students_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    // Either a file on disk, or uploaded content plus its original file name.
    let result = match optional_str(req, "inPath") {
        Some(in_path) => {
            let path = PathBuf::from(&in_path);
            exchange::import_csv_file(conn, &path).map_err(|e| {
                HandlerErr::new(e.code(), e.to_string()).with_details(json!({ "path": in_path }))
            })
        }
        None => {
            let Some(file_name) = optional_str(req, "fileName") else {
                return err(&req.id, "bad_params", "missing inPath or fileName", None);
            };
            let Some(text) = req.params.get("text").and_then(|v| v.as_str()) else {
                return err(&req.id, "bad_params", "missing text", None);
            };
            exchange::import_csv_text(conn, &file_name, text).map_err(|e| {
                HandlerErr::new(e.code(), e.to_string())
                    .with_details(json!({ "fileName": file_name }))
            })
        }
    };

    let mut summary = match result {
        Ok(s) => s,
        Err(e) => {
            log::warn!("import failed: {}", e.message);
            return e.response(&req.id);
        }
    };

    let max_errors = setup::import_max_errors(conn).unwrap_or(setup::IMPORT_MAX_ERRORS_DEFAULT);
    let errors_truncated = summary.errors.len() > max_errors;
    summary.errors.truncate(max_errors);

    let mut result = json!(summary);
    result["errorsTruncated"] = json!(errors_truncated);
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.importCsv" => Some(handle_students_import_csv(state, req)),
        _ => None,
    }
}
