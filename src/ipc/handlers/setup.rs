use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::{TOP_N_DEFAULT, TOP_N_MIN};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const IMPORT_MAX_ERRORS_DEFAULT: usize = 100;

#[derive(Clone, Copy)]
enum SetupSection {
    Reports,
    Import,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [SetupSection::Reports, SetupSection::Import];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "reports" => Some(Self::Reports),
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Reports => "reports",
            Self::Import => "import",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Reports => "setup.reports",
            Self::Import => "setup.import",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Reports => json!({
            "topNDefault": TOP_N_DEFAULT,
            "defaultChart": "topN",
            "defaultSubject": "Math"
        }),
        SetupSection::Import => json!({
            "maxErrorsReported": IMPORT_MAX_ERRORS_DEFAULT
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_one_of(v: &Value, key: &str, allowed: &[&str]) -> Result<String, String> {
    let s = v
        .as_str()
        .map(str::trim)
        .ok_or_else(|| format!("{} must be string", key))?;
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(s))
        .map(|a| a.to_string())
        .ok_or_else(|| format!("{} must be one of: {}", key, allowed.join(", ")))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Reports => match k.as_str() {
                "topNDefault" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, TOP_N_MIN as i64, 100)?),
                    );
                }
                "defaultChart" => {
                    let kind = parse_one_of(v, k, &["topN", "subjectMax", "subjectMean"])?;
                    obj.insert(k.clone(), Value::String(kind));
                }
                "defaultSubject" => {
                    let subject = parse_one_of(v, k, &["Math", "Science", "English"])?;
                    obj.insert(k.clone(), Value::String(subject));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Import => match k.as_str() {
                "maxErrorsReported" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 1000)?));
                }
                _ => return Err(format!("unknown import field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// Report defaults as stored for this workspace.
pub struct ReportDefaults {
    pub top_n: usize,
    pub chart: String,
    pub subject: String,
}

pub fn report_defaults(conn: &Connection) -> anyhow::Result<ReportDefaults> {
    let section = load_section(conn, SetupSection::Reports)?;
    Ok(ReportDefaults {
        top_n: section
            .get("topNDefault")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(TOP_N_DEFAULT),
        chart: section
            .get("defaultChart")
            .and_then(|v| v.as_str())
            .unwrap_or("topN")
            .to_string(),
        subject: section
            .get("defaultSubject")
            .and_then(|v| v.as_str())
            .unwrap_or("Math")
            .to_string(),
    })
}

pub fn import_max_errors(conn: &Connection) -> anyhow::Result<usize> {
    let section = load_section(conn, SetupSection::Import)?;
    Ok(section
        .get("maxErrorsReported")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(IMPORT_MAX_ERRORS_DEFAULT))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    log::info!("setup section {} updated", section.name());
    let mut result = json!({ "ok": true });
    result[section.name()] = current;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
