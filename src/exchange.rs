use crate::ingest::{self, NewRecord, RawMarks, RawRow, RowOutcome, Subject};
use crate::report::{Report, REPORT_COLUMNS};
use crate::store::{self, StoreError};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const EXPORTS_DIR: &str = "exports";

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("csv file has no `name` column")]
    MissingNameColumn,
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExchangeError {
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::MissingNameColumn => "bad_columns",
            ExchangeError::Csv(_) => "bad_csv",
            ExchangeError::Io(_) => "io_failed",
            ExchangeError::Store(_) => "db_insert_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub line: u64,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub source: String,
    pub rows_total: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<RowError>,
    pub student_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct ParsedImport {
    records: Vec<NewRecord>,
    rows_total: usize,
    skipped: usize,
    errors: Vec<RowError>,
}

struct ImportColumns {
    name: usize,
    marks: Option<usize>,
    subjects: Vec<(String, usize)>,
}

fn locate_columns(headers: &csv::StringRecord) -> Result<ImportColumns, ExchangeError> {
    let find = |wanted: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(wanted))
    };
    let name = find("name").ok_or(ExchangeError::MissingNameColumn)?;
    let subjects = Subject::ALL
        .into_iter()
        .filter_map(|s| find(s.as_str()).map(|idx| (s.as_str().to_string(), idx)))
        .collect();
    Ok(ImportColumns {
        name,
        marks: find("marks"),
        subjects,
    })
}

fn raw_row(record: &csv::StringRecord, cols: &ImportColumns) -> RawRow {
    let cell = |idx: usize| record.get(idx).map(str::to_string);
    let marks = match cols.marks.and_then(cell) {
        Some(text) if !text.trim().is_empty() => Some(RawMarks::Text(text)),
        _ if !cols.subjects.is_empty() => Some(RawMarks::Columns(
            cols.subjects
                .iter()
                .map(|(header, idx)| (header.clone(), cell(*idx).unwrap_or_default()))
                .collect(),
        )),
        _ => None,
    };
    RawRow {
        name: cell(cols.name),
        marks,
    }
}

fn parse_import(text: &str, source: &str) -> Result<ParsedImport, ExchangeError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let cols = locate_columns(reader.headers()?)?;

    let mut parsed = ParsedImport::default();
    for (idx, result) in reader.records().enumerate() {
        parsed.rows_total += 1;
        // Header is line 1.
        let fallback_line = idx as u64 + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(fallback_line);
                parsed.errors.push(RowError {
                    line,
                    code: "bad_csv".into(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(fallback_line);

        match ingest::normalize_row(raw_row(&record, &cols), source) {
            Ok(RowOutcome::Record(rec)) => parsed.records.push(rec),
            Ok(RowOutcome::Skipped) => parsed.skipped += 1,
            Err(e) => {
                log::debug!("import {}: line {} rejected: {}", source, line, e);
                parsed.errors.push(RowError {
                    line,
                    code: e.code().into(),
                    message: e.to_string(),
                });
            }
        }
    }
    Ok(parsed)
}

/// Imports CSV text; every row that normalizes cleanly is inserted under `source`.
pub fn import_csv_text(
    conn: &Connection,
    source: &str,
    text: &str,
) -> Result<ImportSummary, ExchangeError> {
    let parsed = parse_import(text, source)?;
    let student_ids = store::create_many(conn, &parsed.records)?;
    let summary = ImportSummary {
        source: source.to_string(),
        rows_total: parsed.rows_total,
        inserted: student_ids.len(),
        skipped: parsed.skipped,
        failed: parsed.errors.len(),
        errors: parsed.errors,
        student_ids,
    };
    log::info!(
        "imported {}: {} inserted, {} skipped, {} failed",
        summary.source,
        summary.inserted,
        summary.skipped,
        summary.failed
    );
    Ok(summary)
}

/// The file name of `path` becomes the source tag.
pub fn import_csv_file(conn: &Connection, path: &Path) -> Result<ImportSummary, ExchangeError> {
    let text = std::fs::read_to_string(path)?;
    let source = source_tag_for_path(path);
    import_csv_text(conn, &source, &text)
}

pub fn source_tag_for_path(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

pub fn export_csv(report: &Report) -> Result<Vec<u8>, ExchangeError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(REPORT_COLUMNS)?;
    for row in &report.rows {
        writer.write_record([
            row.name.clone(),
            row.marks.math.to_string(),
            row.marks.science.to_string(),
            row.marks.english.to_string(),
            row.average.to_string(),
            row.source.clone(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| ExchangeError::Io(e.into_error()))
}

/// `<workspace>/exports/<source>_records.csv`, with path separators in the
/// source tag replaced.
pub fn default_export_path(workspace: &Path, source: &str) -> PathBuf {
    let safe: String = source
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    let safe = if safe.is_empty() || safe == "." || safe == ".." {
        "records".to_string()
    } else {
        safe
    };
    workspace
        .join(EXPORTS_DIR)
        .join(format!("{}_records.csv", safe))
}

pub fn write_export(path: &Path, bytes: &[u8]) -> Result<(), ExchangeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}
