use crate::calc::AssessmentType;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Enrollment,
    Assessments,
    Conference,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [
        SetupSection::Enrollment,
        SetupSection::Assessments,
        SetupSection::Conference,
    ];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "enrollment" => Some(Self::Enrollment),
            "assessments" => Some(Self::Assessments),
            "conference" => Some(Self::Conference),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Enrollment => "enrollment",
            Self::Assessments => "assessments",
            Self::Conference => "conference",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Enrollment => "setup.enrollment",
            Self::Assessments => "setup.assessments",
            Self::Conference => "setup.conference",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Enrollment => json!({
            "firstSemesterName": "Semester 1",
            "requireSisForm": true
        }),
        SetupSection::Assessments => json!({
            "seedResultTypes": [
                AssessmentType::ClassParticipation.label(),
                AssessmentType::FinalOnPaper.label(),
                AssessmentType::Midterm.label(),
                AssessmentType::Tutorial.label()
            ],
            "defaultTotalMark": 100
        }),
        SetupSection::Conference => json!({
            "earlyJoinMinutes": 0
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_assessment_types(v: &Value, key: &str) -> Result<Value, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of assessment types", key))?;
    let mut labels: Vec<&'static str> = Vec::new();
    for item in arr {
        let label = item
            .as_str()
            .and_then(AssessmentType::from_label)
            .ok_or_else(|| format!("{} contains an unknown assessment type: {}", key, item))?
            .label();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    Ok(json!(labels))
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
            SetupSection::Enrollment => match k.as_str() {
                "firstSemesterName" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 64)?));
                }
                "requireSisForm" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown enrollment field: {}", k)),
            },
            SetupSection::Assessments => match k.as_str() {
                "seedResultTypes" => {
                    obj.insert(k.clone(), parse_assessment_types(v, k)?);
                }
                "defaultTotalMark" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 1000)?));
                }
                _ => return Err(format!("unknown assessments field: {}", k)),
            },
            SetupSection::Conference => match k.as_str() {
                "earlyJoinMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 60)?));
                }
                _ => return Err(format!("unknown conference field: {}", k)),
            },
        }
    }
    Ok(())
}

/// Applies stored fields one at a time; a malformed or unknown field keeps
/// its default and the rest still load.
fn merge_stored_section(section: SetupSection, current: &mut Value, saved: &Map<String, Value>) {
    for (k, v) in saved {
        let mut single = Map::new();
        single.insert(k.clone(), v.clone());
        if let Err(e) = merge_section_patch(section, current, &single) {
            tracing::warn!(section = section.name(), field = %k, error = %e, "ignoring stored setup value");
        }
    }
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            merge_stored_section(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// Section value with defaults when the settings row cannot be read.
pub fn section_or_default(conn: &rusqlite::Connection, section: SetupSection) -> Value {
    match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(section = section.name(), error = %format!("{e:#}"), "setup unreadable; using defaults");
            default_section(section)
        }
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
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

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
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
    let mut out = json!({ "ok": true });
    out[section.name()] = current;
    ok(&req.id, out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
