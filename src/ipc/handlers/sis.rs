use crate::ipc::handlers::catalog::{is_unique_violation, student_card};
use crate::ipc::helpers::{
    get_required_str, new_id, now_rfc3339, with_conn, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ParentInfo {
    pub name: Option<String>,
    pub nrc: Option<String>,
    pub birthplace: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub profession: Option<String>,
    pub email: Option<String>,
    pub ethnicity: Option<String>,
    pub religion: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MatriculationInfo {
    pub roll_no: Option<String>,
    pub exam_dept: Option<String>,
    pub passed_year: Option<String>,
    pub total_marks: Option<String>,
}

/// Student information sheet, filled once before the first enrollment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SisForm {
    pub blood_group: Option<String>,
    pub ethnicity: Option<String>,
    pub religion: Option<String>,
    pub nrc: Option<String>,
    pub birthplace: Option<String>,
    pub father: ParentInfo,
    pub mother: ParentInfo,
    pub matriculation: MatriculationInfo,
    pub has_spouse: bool,
    pub spouse_name: Option<String>,
}

impl SisForm {
    fn from_params(params: &Value) -> Result<Self, HandlerErr> {
        let raw = params.get("form").cloned().unwrap_or_else(|| json!({}));
        let mut form: SisForm = serde_json::from_value(raw)
            .map_err(|e| HandlerErr::bad_params(format!("invalid form: {}", e)))?;
        if !form.has_spouse {
            form.spouse_name = None;
        }
        Ok(form)
    }
}

fn optional_field(obj: Option<&Value>, key: &str) -> Option<String> {
    obj.and_then(|o| o.get(key))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Contact details and emergency contact live on the user row.
fn apply_contact(conn: &Connection, student_id: &str, params: &Value) -> Result<(), HandlerErr> {
    let (user_id, emergency_id): (String, Option<String>) = conn
        .query_row(
            "SELECT u.id, u.emergency_contact_id FROM students s JOIN users u ON u.id = s.user_id WHERE s.id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::query)?;

    let contact = params.get("contact");
    let email = optional_field(contact, "email").map(|e| e.to_ascii_lowercase());
    if email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(HandlerErr::bad_params("contact.email must be an email address"));
    }
    conn.execute(
        "UPDATE users
         SET city = COALESCE(?, city), email = COALESCE(?, email), phone = COALESCE(?, phone)
         WHERE id = ?",
        (
            optional_field(contact, "city"),
            &email,
            optional_field(contact, "phone"),
            &user_id,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new("conflict", "a user with this email already exists")
                .with_details(json!({ "email": email }))
        } else {
            HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "users" }))
        }
    })?;

    let Some(emergency) = params.get("emergencyContact").filter(|v| v.is_object()) else {
        return Ok(());
    };
    let fields = (
        optional_field(Some(emergency), "name"),
        optional_field(Some(emergency), "email"),
        optional_field(Some(emergency), "phone"),
        optional_field(Some(emergency), "relation"),
    );
    match emergency_id {
        Some(id) => {
            conn.execute(
                "UPDATE emergency_contacts SET contact_name = ?, email = ?, phone = ?, relation = ? WHERE id = ?",
                (&fields.0, &fields.1, &fields.2, &fields.3, &id),
            )
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO emergency_contacts(id, contact_name, email, phone, relation) VALUES(?, ?, ?, ?, ?)",
                (&id, &fields.0, &fields.1, &fields.2, &fields.3),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
            conn.execute(
                "UPDATE users SET emergency_contact_id = ? WHERE id = ?",
                (&id, &user_id),
            )
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        }
    }
    Ok(())
}

/// `(form id, created at, form)` for a student.
pub fn sis_form_for(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<(String, String, SisForm)>, HandlerErr> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, created_at, form_json FROM sis_forms WHERE student_id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(row.map(|(id, created_at, raw)| {
        let form = serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(student_id, error = %e, "stored SIS form unreadable; showing blank form");
            SisForm::default()
        });
        (id, created_at, form)
    }))
}

fn required_student(conn: &Connection, student_id: &str) -> Result<Value, HandlerErr> {
    student_card(conn, student_id)?.ok_or_else(|| {
        HandlerErr::not_found("student not found").with_details(json!({ "id": student_id }))
    })
}

fn form_json(form: &SisForm) -> Result<String, HandlerErr> {
    serde_json::to_string(form).map_err(|e| HandlerErr::new("io_failed", e.to_string()))
}

fn sis_get(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let student = required_student(conn, &student_id)?;
    let out = match sis_form_for(conn, &student_id)? {
        Some((form_id, created_at, form)) => json!({
            "student": student,
            "sisFormId": form_id,
            "createdAt": created_at,
            "form": form
        }),
        None => json!({ "student": student, "sisFormId": null, "form": null }),
    };
    Ok(out)
}

fn sis_save(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    required_student(conn, &student_id)?;
    let form = SisForm::from_params(params)?;
    if sis_form_for(conn, &student_id)?.is_some() {
        return Err(HandlerErr::new("conflict", "SIS form already submitted; use sis.update")
            .with_details(json!({ "studentId": student_id })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    apply_contact(&tx, &student_id, params)?;
    let form_id = new_id();
    tx.execute(
        "INSERT INTO sis_forms(id, student_id, created_at, form_json) VALUES(?, ?, ?, ?)",
        (&form_id, &student_id, now_rfc3339(), form_json(&form)?),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "sis_forms" })))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(student_id = %student_id, "SIS form saved");
    Ok(json!({ "success": true, "sisFormId": form_id }))
}

fn sis_update(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    required_student(conn, &student_id)?;
    let form = SisForm::from_params(params)?;
    let Some((form_id, _, _)) = sis_form_for(conn, &student_id)? else {
        return Err(HandlerErr::not_found("no SIS form found to update")
            .with_details(json!({ "studentId": student_id })));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    apply_contact(&tx, &student_id, params)?;
    tx.execute(
        "UPDATE sis_forms SET form_json = ? WHERE id = ?",
        (form_json(&form)?, &form_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "sis_forms" })))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "success": true, "sisFormId": form_id }))
}

fn profile_get(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let student = required_student(conn, &student_id)?;
    let (has_form, form) = match sis_form_for(conn, &student_id)? {
        Some((_, _, form)) => (true, form),
        None => (false, SisForm::default()),
    };
    Ok(json!({ "student": student, "hasSisForm": has_form, "form": form }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "sis.get" => sis_get,
        "sis.save" => sis_save,
        "sis.update" => sis_update,
        "profile.get" => profile_get,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spouse_name_dropped_without_spouse() {
        let params = json!({
            "form": {
                "bloodGroup": "O+",
                "father": { "name": "U Ba", "profession": "Teacher" },
                "hasSpouse": false,
                "spouseName": "ignored"
            }
        });
        let form = SisForm::from_params(&params).expect("valid form");
        assert_eq!(form.blood_group.as_deref(), Some("O+"));
        assert_eq!(form.father.profession.as_deref(), Some("Teacher"));
        assert_eq!(form.spouse_name, None);
    }

    #[test]
    fn unknown_form_fields_are_rejected() {
        let params = json!({ "form": { "shoeSize": 42 } });
        let err = SisForm::from_params(&params).expect_err("unknown field");
        assert_eq!(err.code, "bad_params");
    }
}
