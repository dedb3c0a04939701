use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MANUAL_SOURCE: &str = "manual";
pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subject {
    Math,
    Science,
    English,
}

impl Subject {
    pub const ALL: [Subject; 3] = [Subject::Math, Subject::Science, Subject::English];

    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Math => "Math",
            Subject::Science => "Science",
            Subject::English => "English",
        }
    }

    /// Case-insensitive lookup; anything outside the fixed set is `None`.
    pub fn parse(raw: &str) -> Option<Subject> {
        let key = raw.trim();
        Subject::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(key))
    }
}

/// Round half away from zero to two decimals.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Canonical marks: always exactly the three subjects.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Marks {
    #[serde(rename = "Math")]
    pub math: f64,
    #[serde(rename = "Science")]
    pub science: f64,
    #[serde(rename = "English")]
    pub english: f64,
}

impl Marks {
    #[cfg(test)]
    pub fn new(math: f64, science: f64, english: f64) -> Self {
        Self {
            math,
            science,
            english,
        }
    }

    pub fn get(&self, subject: Subject) -> f64 {
        match subject {
            Subject::Math => self.math,
            Subject::Science => self.science,
            Subject::English => self.english,
        }
    }

    pub fn set(&mut self, subject: Subject, value: f64) {
        match subject {
            Subject::Math => self.math = value,
            Subject::Science => self.science = value,
            Subject::English => self.english = value,
        }
    }

    pub fn scores(&self) -> [f64; 3] {
        [self.math, self.science, self.english]
    }

    pub fn average(&self) -> f64 {
        round_2(self.scores().iter().sum::<f64>() / 3.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRecord {
    pub name: String,
    pub marks: Marks,
    pub source: String,
}

impl NewRecord {
    #[cfg(test)]
    pub fn manual(name: impl Into<String>, marks: Marks) -> Self {
        Self {
            name: name.into(),
            marks,
            source: MANUAL_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawMarks {
    /// Already-structured mapping, e.g. a JSON object.
    Structured(serde_json::Map<String, serde_json::Value>),
    /// Textual mapping such as `{'Math': 80, 'Science': 90}`.
    Text(String),
    /// One cell per subject column, keyed by column header.
    Columns(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRow {
    pub name: Option<String>,
    pub marks: Option<RawMarks>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Record(NewRecord),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("malformed marks: {reason}")]
    MalformedMarks { reason: String },
}

impl IngestError {
    fn malformed(reason: impl Into<String>) -> Self {
        IngestError::MalformedMarks {
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            IngestError::MalformedMarks { .. } => "malformed_marks",
        }
    }
}

fn check_score(subject: &str, value: f64) -> Result<f64, IngestError> {
    if !value.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&value) {
        return Err(IngestError::malformed(format!(
            "score for {} must be within {}..={}, got {}",
            subject, MIN_SCORE, MAX_SCORE, value
        )));
    }
    Ok(value)
}

/// Turns one raw input row into a canonical record tagged with `source`.
pub fn normalize_row(row: RawRow, source: &str) -> Result<RowOutcome, IngestError> {
    let name = match row.name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => return Ok(RowOutcome::Skipped),
    };

    let marks = match row.marks {
        None => Marks::default(),
        Some(RawMarks::Structured(map)) => marks_from_structured(&map)?,
        Some(RawMarks::Text(text)) => marks_from_pairs(parse_marks_text(&text)?)?,
        Some(RawMarks::Columns(cells)) => marks_from_columns(&cells)?,
    };

    Ok(RowOutcome::Record(NewRecord {
        name,
        marks,
        source: source.to_string(),
    }))
}

fn marks_from_pairs(pairs: Vec<(String, MarkValue)>) -> Result<Marks, IngestError> {
    let mut marks = Marks::default();
    for (key, value) in pairs {
        let Some(subject) = Subject::parse(&key) else {
            continue;
        };
        let v = match value {
            MarkValue::Number(v) => v,
            MarkValue::Other(literal) => {
                return Err(IngestError::malformed(format!(
                    "score for {} is not a number: {}",
                    subject.as_str(),
                    literal
                )))
            }
        };
        marks.set(subject, check_score(subject.as_str(), v)?);
    }
    Ok(marks)
}

pub fn marks_from_structured(
    map: &serde_json::Map<String, serde_json::Value>,
) -> Result<Marks, IngestError> {
    let mut marks = Marks::default();
    for (key, value) in map {
        let Some(subject) = Subject::parse(key) else {
            continue;
        };
        let Some(v) = value.as_f64() else {
            return Err(IngestError::malformed(format!(
                "score for {} is not a number",
                subject.as_str()
            )));
        };
        marks.set(subject, check_score(subject.as_str(), v)?);
    }
    Ok(marks)
}

fn marks_from_columns(cells: &[(String, String)]) -> Result<Marks, IngestError> {
    let mut marks = Marks::default();
    for (header, cell) in cells {
        let Some(subject) = Subject::parse(header) else {
            continue;
        };
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        let v = cell.parse::<f64>().map_err(|_| {
            IngestError::malformed(format!(
                "score for {} is not a number: {:?}",
                subject.as_str(),
                cell
            ))
        })?;
        marks.set(subject, check_score(subject.as_str(), v)?);
    }
    Ok(marks)
}

/// A literal value read from marks text.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkValue {
    Number(f64),
    /// Quoted string, `None`/`null` or a boolean, kept as written.
    Other(String),
}

const KEYWORD_LITERALS: [&str; 6] = ["None", "null", "True", "False", "true", "false"];

/// Strict parser for textual marks mappings.
///
/// Grammar: an optional `{ ... }` around `key: value` entries separated by
/// `,` or `;`. Keys are quoted (`'` or `"`) or bare identifiers. Values are
/// numbers, quoted strings, `None`/`null` or booleans. Nothing is ever
/// evaluated; any other input is rejected.
pub fn parse_marks_text(text: &str) -> Result<Vec<(String, MarkValue)>, IngestError> {
    MarksParser::new(text).parse()
}

struct MarksParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> MarksParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn fail(&self, what: &str) -> IngestError {
        IngestError::malformed(format!("{} at offset {}", what, self.pos))
    }

    fn parse(mut self) -> Result<Vec<(String, MarkValue)>, IngestError> {
        let mut pairs = Vec::new();
        self.skip_ws();
        let braced = self.peek() == Some(b'{');
        if braced {
            self.pos += 1;
        }

        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'}') if braced => {
                    self.pos += 1;
                    break;
                }
                None if !braced => break,
                None => return Err(self.fail("unclosed '{'")),
                _ => {}
            }

            let key = self.parse_key()?;
            self.skip_ws();
            if self.peek() != Some(b':') {
                return Err(self.fail("expected ':'"));
            }
            self.pos += 1;
            self.skip_ws();
            let value = self.parse_value()?;
            pairs.push((key, value));

            self.skip_ws();
            match self.peek() {
                Some(b',') | Some(b';') => self.pos += 1,
                Some(b'}') if braced => {
                    self.pos += 1;
                    break;
                }
                None if !braced => break,
                None => return Err(self.fail("unclosed '{'")),
                Some(_) => return Err(self.fail("unexpected character")),
            }
        }

        self.skip_ws();
        if self.pos < self.src.len() {
            return Err(self.fail("trailing input"));
        }
        Ok(pairs)
    }

    fn parse_key(&mut self) -> Result<String, IngestError> {
        match self.peek() {
            Some(q @ (b'\'' | b'"')) => self.parse_quoted(q),
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => Ok(self.parse_ident().to_string()),
            _ => Err(self.fail("expected key")),
        }
    }

    /// Reads a quoted run starting at the opening quote `q`.
    fn parse_quoted(&mut self, q: u8) -> Result<String, IngestError> {
        let start = self.pos + 1;
        let Some(len) = self.src[start..].find(q as char) else {
            return Err(self.fail("unterminated quoted string"));
        };
        self.pos = start + len + 1;
        Ok(self.src[start..start + len].to_string())
    }

    fn parse_ident(&mut self) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        &src[start..self.pos]
    }

    fn parse_value(&mut self) -> Result<MarkValue, IngestError> {
        match self.peek() {
            Some(q @ (b'\'' | b'"')) => {
                let text = self.parse_quoted(q)?;
                Ok(MarkValue::Other(format!("{}{}{}", q as char, text, q as char)))
            }
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => {
                let start = self.pos;
                let word = self.parse_ident();
                if KEYWORD_LITERALS.contains(&word) {
                    Ok(MarkValue::Other(word.to_string()))
                } else {
                    self.pos = start;
                    Err(self.fail("expected literal value"))
                }
            }
            _ => self.parse_number().map(MarkValue::Number),
        }
    }

    fn parse_number(&mut self) -> Result<f64, IngestError> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b) if b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        let literal = &self.src[start..self.pos];
        if literal.is_empty() {
            return Err(self.fail("expected number"));
        }
        match literal.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => {
                self.pos = start;
                Err(self.fail("invalid number"))
            }
        }
    }
}
