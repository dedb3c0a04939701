use crate::ingest::{Marks, NewRecord};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("student not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One stored document, exactly as persisted.
///
/// Fields are optional because rows are not validated on write by every
/// producer; the report engine normalizes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: String,
    pub name: Option<String>,
    pub marks: Option<serde_json::Value>,
    pub source: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn stored_from_row(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let marks_text: Option<String> = row.get(2)?;
    // Text that is not JSON is kept as a plain string so reports can flag it.
    let marks = marks_text.map(|t| {
        serde_json::from_str(&t).unwrap_or(serde_json::Value::String(t))
    });
    Ok(StoredRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        marks,
        source: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn insert(conn: &Connection, rec: &NewRecord, now: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let marks = serde_json::to_string(&rec.marks)?;
    conn.execute(
        "INSERT INTO students(id, name, marks, source, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &rec.name, &marks, &rec.source, now, now),
    )?;
    Ok(id)
}

pub fn create(conn: &Connection, rec: &NewRecord) -> Result<String> {
    insert(conn, rec, &now_rfc3339())
}

/// Inserts all records or none.
pub fn create_many(conn: &Connection, recs: &[NewRecord]) -> Result<Vec<String>> {
    let tx = conn.unchecked_transaction()?;
    let now = now_rfc3339();
    let mut ids = Vec::with_capacity(recs.len());
    for rec in recs {
        ids.push(insert(&tx, rec, &now)?);
    }
    tx.commit()?;
    Ok(ids)
}

pub fn list_all(conn: &Connection) -> Result<Vec<StoredRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, marks, source, created_at, updated_at
         FROM students
         ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], stored_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find(conn: &Connection, id: &str) -> Result<Option<StoredRecord>> {
    let rec = conn
        .query_row(
            "SELECT id, name, marks, source, created_at, updated_at
             FROM students
             WHERE id = ?",
            [id],
            stored_from_row,
        )
        .optional()?;
    Ok(rec)
}

/// Replaces name and marks; `source` is left untouched.
pub fn update(conn: &Connection, id: &str, name: &str, marks: &Marks) -> Result<()> {
    let marks = serde_json::to_string(marks)?;
    let changed = conn.execute(
        "UPDATE students SET name = ?, marks = ?, updated_at = ? WHERE id = ?",
        (name, &marks, now_rfc3339(), id),
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute("DELETE FROM students WHERE id = ?", [id])?;
    if changed == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}
