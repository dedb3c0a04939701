use crate::ingest::{round_2, Marks, Subject, MANUAL_SOURCE};
use crate::store::StoredRecord;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

pub const REPORT_COLUMNS: [&str; 6] = ["name", "Math", "Science", "English", "average", "source"];
pub const TOP_N_MIN: usize = 3;
pub const TOP_N_DEFAULT: usize = 10;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportError {
    #[error("no student data available")]
    EmptyStore,
    #[error("no records for source {0:?}")]
    EmptyPartition(String),
    #[error("record {id} has no usable {column} column")]
    IncompleteReport { id: String, column: &'static str },
}

impl ReportError {
    pub fn status(&self) -> &'static str {
        match self {
            ReportError::EmptyStore => "empty_store",
            ReportError::EmptyPartition(_) => "empty_partition",
            ReportError::IncompleteReport { .. } => "incomplete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub marks: Marks,
    pub average: f64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopScorer {
    pub id: String,
    pub name: String,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_students: usize,
    pub overall_average: f64,
    pub overall_max: f64,
    pub overall_min: f64,
    pub top_scorer: TopScorer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub source: String,
    pub rows: Vec<ReportRow>,
    pub summary: Summary,
}

/// Untagged records belong to the manual partition.
pub fn source_of(rec: &StoredRecord) -> &str {
    rec.source.as_deref().unwrap_or(MANUAL_SOURCE)
}

pub fn source_options(records: &[StoredRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| source_of(r).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Picks the requested source, or the first selectable one.
pub fn select_source(
    records: &[StoredRecord],
    requested: Option<&str>,
) -> Result<String, ReportError> {
    if records.is_empty() {
        return Err(ReportError::EmptyStore);
    }
    match requested {
        Some(s) => Ok(s.to_string()),
        None => source_options(records)
            .into_iter()
            .next()
            .ok_or(ReportError::EmptyStore),
    }
}

fn stored_marks(rec: &StoredRecord) -> Result<Marks, ReportError> {
    let incomplete = |column: &'static str| ReportError::IncompleteReport {
        id: rec.id.clone(),
        column,
    };
    let map = match &rec.marks {
        None | Some(serde_json::Value::Null) => return Ok(Marks::default()),
        Some(serde_json::Value::Object(map)) => map,
        Some(_) => return Err(incomplete("marks")),
    };

    let mut marks = Marks::default();
    for (key, value) in map {
        let Some(subject) = Subject::parse(key) else {
            continue;
        };
        match value.as_f64() {
            Some(v) if v.is_finite() => marks.set(subject, v),
            _ => return Err(incomplete(subject.as_str())),
        }
    }
    Ok(marks)
}

/// Flattens one stored record into a report row.
pub fn normalize_record(rec: &StoredRecord) -> Result<ReportRow, ReportError> {
    let name = match rec.name.as_deref() {
        Some(n) if !n.trim().is_empty() => n.to_string(),
        _ => {
            return Err(ReportError::IncompleteReport {
                id: rec.id.clone(),
                column: "name",
            })
        }
    };
    let marks = stored_marks(rec)?;
    Ok(ReportRow {
        id: rec.id.clone(),
        name,
        average: marks.average(),
        marks,
        source: source_of(rec).to_string(),
    })
}

pub fn partition_rows(
    records: &[StoredRecord],
    source: &str,
) -> Result<Vec<ReportRow>, ReportError> {
    if records.is_empty() {
        return Err(ReportError::EmptyStore);
    }
    let rows = records
        .iter()
        .filter(|r| source_of(r) == source)
        .map(normalize_record)
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Err(ReportError::EmptyPartition(source.to_string()));
    }
    Ok(rows)
}

/// Statistics over the pooled 3×N subject scores. `None` for an empty table.
pub fn summarize(rows: &[ReportRow]) -> Option<Summary> {
    let pooled: Vec<f64> = rows.iter().flat_map(|r| r.marks.scores()).collect();
    if pooled.is_empty() {
        return None;
    }
    let sum: f64 = pooled.iter().sum();
    let overall_max = pooled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let overall_min = pooled.iter().copied().fold(f64::INFINITY, f64::min);

    // Strict comparison keeps the first row on ties.
    let mut top = &rows[0];
    for row in &rows[1..] {
        if row.average > top.average {
            top = row;
        }
    }

    Some(Summary {
        total_students: rows.len(),
        overall_average: round_2(sum / pooled.len() as f64),
        overall_max,
        overall_min,
        top_scorer: TopScorer {
            id: top.id.clone(),
            name: top.name.clone(),
            average: top.average,
        },
    })
}

pub fn build_report(records: &[StoredRecord], source: &str) -> Result<Report, ReportError> {
    let rows = partition_rows(records, source)?;
    let summary =
        summarize(&rows).ok_or_else(|| ReportError::EmptyPartition(source.to_string()))?;
    Ok(Report {
        source: source.to_string(),
        rows,
        summary,
    })
}

/// Bounds a requested N to `[3, total]`, or to `total` when fewer rows exist.
pub fn clamp_top_n(requested: usize, total: usize) -> usize {
    requested.max(TOP_N_MIN).min(total)
}

/// The `n` highest scorers in `subject`, in ascending score order.
pub fn top_n_in_subject(rows: &[ReportRow], subject: Subject, n: usize) -> Vec<&ReportRow> {
    let mut sorted: Vec<&ReportRow> = rows.iter().collect();
    sorted.sort_by(|a, b| a.marks.get(subject).total_cmp(&b.marks.get(subject)));
    let n = clamp_top_n(n, sorted.len());
    sorted.split_off(sorted.len() - n)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectValue {
    pub subject: Subject,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectShare {
    pub subject: Subject,
    pub mean: f64,
    pub share_percent: f64,
}

pub fn subject_maxima(rows: &[ReportRow]) -> Vec<SubjectValue> {
    Subject::ALL
        .into_iter()
        .map(|subject| SubjectValue {
            subject,
            value: rows
                .iter()
                .map(|r| r.marks.get(subject))
                .fold(f64::NEG_INFINITY, f64::max),
        })
        .collect()
}

pub fn subject_means(rows: &[ReportRow]) -> Vec<SubjectShare> {
    let count = rows.len().max(1) as f64;
    let means: Vec<(Subject, f64)> = Subject::ALL
        .into_iter()
        .map(|s| (s, rows.iter().map(|r| r.marks.get(s)).sum::<f64>() / count))
        .collect();
    let total: f64 = means.iter().map(|(_, m)| m).sum();
    means
        .into_iter()
        .map(|(subject, mean)| SubjectShare {
            subject,
            mean,
            share_percent: if total > 0.0 {
                round_2(100.0 * mean / total)
            } else {
                0.0
            },
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChartKind {
    TopN { subject: Subject, n: Option<usize> },
    SubjectMax,
    SubjectMean,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub id: String,
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChartSeries {
    TopN {
        subject: Subject,
        n: usize,
        entries: Vec<ChartEntry>,
    },
    SubjectMax { points: Vec<SubjectValue> },
    SubjectMean { slices: Vec<SubjectShare> },
}

/// Derives one chart's series; `default_n` applies when the caller gave none.
pub fn chart(rows: &[ReportRow], kind: ChartKind, default_n: usize) -> ChartSeries {
    match kind {
        ChartKind::TopN { subject, n } => {
            let picked = top_n_in_subject(rows, subject, n.unwrap_or(default_n));
            ChartSeries::TopN {
                subject,
                n: picked.len(),
                entries: picked
                    .into_iter()
                    .map(|r| ChartEntry {
                        id: r.id.clone(),
                        name: r.name.clone(),
                        score: r.marks.get(subject),
                    })
                    .collect(),
            }
        }
        ChartKind::SubjectMax => ChartSeries::SubjectMax {
            points: subject_maxima(rows),
        },
        ChartKind::SubjectMean => ChartSeries::SubjectMean {
            slices: subject_means(rows),
        },
    }
}
