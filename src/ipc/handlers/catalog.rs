use crate::ipc::helpers::{
    get_optional_f64, get_optional_str, get_required_str, new_id, now_rfc3339, require_row,
    with_conn, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::calc::WeightScheme;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

const SYLLABUS_TYPES: [&str; 4] = ["core", "supportive", "elective", "extracurricular"];

pub fn gender_display(code: Option<&str>) -> Option<String> {
    code.map(|c| match c.trim().to_ascii_uppercase().as_str() {
        "M" => "Male".to_string(),
        "F" => "Female".to_string(),
        "O" => "Other".to_string(),
        _ => c.to_string(),
    })
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn insert_user(conn: &Connection, params: &Value) -> Result<String, HandlerErr> {
    let full_name = get_required_str(params, "fullName")?;
    let email = get_required_str(params, "email")?.to_ascii_lowercase();
    if !email.contains('@') {
        return Err(HandlerErr::bad_params("email must be an email address"));
    }
    let user_id = new_id();
    conn.execute(
        "INSERT INTO users(id, full_name, email, phone, city, gender, date_of_birth, telegram_username, outlook_email)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &full_name,
            &email,
            get_optional_str(params, "phone")?,
            get_optional_str(params, "city")?,
            get_optional_str(params, "gender")?,
            get_optional_str(params, "dateOfBirth")?,
            get_optional_str(params, "telegramUsername")?,
            get_optional_str(params, "outlookEmail")?,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new("conflict", "a user with this email already exists")
                .with_details(json!({ "email": email }))
        } else {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "users" }))
        }
    })?;
    Ok(user_id)
}

fn terms_create(conn: &Connection, params: &Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let term_id = new_id();
    conn.execute(
        "INSERT INTO terms(id, name, created_at) VALUES(?, ?, ?)",
        (&term_id, &name, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "terms" })))?;
    Ok(json!({ "termId": term_id, "name": name }))
}

fn terms_list(conn: &Connection, _params: &Value) -> HandlerResult {
    let mut stmt = conn
        .prepare("SELECT id, name, created_at FROM terms ORDER BY created_at, rowid")
        .map_err(HandlerErr::query)?;
    let terms = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "terms": terms }))
}

fn degrees_create(conn: &Connection, params: &Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let code = get_required_str(params, "code")?;
    let degree_id = new_id();
    conn.execute(
        "INSERT INTO degrees(id, name, code) VALUES(?, ?, ?)",
        (&degree_id, &name, &code),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "degrees" })))?;
    Ok(json!({ "degreeId": degree_id, "name": name, "code": code }))
}

pub fn degrees_json(conn: &Connection) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, code FROM degrees ORDER BY name")
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(rows)
}

fn degrees_list(conn: &Connection, _params: &Value) -> HandlerResult {
    Ok(json!({ "degrees": degrees_json(conn)? }))
}

fn parse_syllabus(raw: Option<&Value>) -> Result<Value, HandlerErr> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(json!([]));
    };
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("syllabus must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(code) = item
            .get("courseCode")
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        else {
            return Err(HandlerErr::bad_params(format!(
                "syllabus[{}].courseCode is required",
                i
            )));
        };
        let kind = item
            .get("type")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "core".to_string());
        if !SYLLABUS_TYPES.contains(&kind.as_str()) {
            return Err(HandlerErr::bad_params(format!(
                "syllabus[{}].type must be one of: {}",
                i,
                SYLLABUS_TYPES.join(", ")
            )));
        }
        out.push(json!({ "courseCode": code, "type": kind }));
    }
    Ok(Value::Array(out))
}

fn semesters_create(conn: &Connection, params: &Value) -> HandlerResult {
    let degree_id = get_required_str(params, "degreeId")?;
    let name = get_required_str(params, "name")?;
    require_row(conn, "degrees", &degree_id, "degree")?;
    let syllabus = parse_syllabus(params.get("syllabus"))?;

    let semester_id = new_id();
    conn.execute(
        "INSERT INTO semesters(id, degree_id, name, syllabus_json) VALUES(?, ?, ?, ?)",
        (&semester_id, &degree_id, &name, syllabus.to_string()),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "semesters" }))
    })?;
    Ok(json!({ "semesterId": semester_id, "name": name, "syllabus": syllabus }))
}

/// Splits "Semester 3" into `("Semester", 3)`.
pub fn split_semester_number(name: &str) -> Option<(&str, u32)> {
    let (prefix, last) = name.trim().rsplit_once(char::is_whitespace)?;
    let n: u32 = last.parse().ok()?;
    Some((prefix.trim_end(), n))
}

/// Orders "Semester 2" before "Semester 10".
pub fn semester_sort_key(name: &str) -> (String, Option<u32>, String) {
    match split_semester_number(name) {
        Some((prefix, n)) => (prefix.to_lowercase(), Some(n), name.to_string()),
        None => (name.trim().to_lowercase(), None, name.to_string()),
    }
}

pub fn semesters_json(conn: &Connection, degree_id: Option<&str>) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.degree_id, d.name, s.syllabus_json
             FROM semesters s
             JOIN degrees d ON d.id = s.degree_id
             WHERE (?1 IS NULL OR s.degree_id = ?1)
             ORDER BY d.name, d.id",
        )
        .map_err(HandlerErr::query)?;
    let mut rows = stmt
        .query_map([degree_id], |r| {
            let syllabus: String = r.get(4)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "degreeId": r.get::<_, String>(2)?,
                "degreeName": r.get::<_, String>(3)?,
                "syllabus": serde_json::from_str::<Value>(&syllabus).unwrap_or_else(|_| json!([]))
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    // Stable sort keeps the degree grouping from the query.
    rows.sort_by_cached_key(|v| {
        (
            v["degreeName"].as_str().unwrap_or_default().to_string(),
            v["degreeId"].as_str().unwrap_or_default().to_string(),
            semester_sort_key(v["name"].as_str().unwrap_or_default()),
        )
    });
    Ok(rows)
}

fn semesters_list(conn: &Connection, params: &Value) -> HandlerResult {
    let degree_id = get_optional_str(params, "degreeId")?;
    Ok(json!({ "semesters": semesters_json(conn, degree_id.as_deref())? }))
}

fn departments_create(conn: &Connection, params: &Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let department_id = new_id();
    conn.execute(
        "INSERT INTO departments(id, name) VALUES(?, ?)",
        (&department_id, &name),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "departments" }))
    })?;
    Ok(json!({ "departmentId": department_id, "name": name }))
}

fn courses_create(conn: &Connection, params: &Value) -> HandlerResult {
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;
    let credits = get_optional_f64(params, "credits")?.unwrap_or(0.0);
    let hours = get_optional_f64(params, "hours")?.unwrap_or(0.0);
    if credits < 0.0 || hours < 0.0 {
        return Err(HandlerErr::bad_params("credits and hours must not be negative"));
    }
    let department_id = get_optional_str(params, "departmentId")?;
    if let Some(d) = department_id.as_deref() {
        require_row(conn, "departments", d, "department")?;
    }
    let marking_scheme = match params.get("markingScheme").filter(|v| !v.is_null()) {
        None => None,
        Some(v) => {
            WeightScheme::from_json(Some(v))
                .map_err(|e| HandlerErr::bad_params(format!("markingScheme: {}", e)))?;
            Some(v.to_string())
        }
    };

    let course_id = new_id();
    conn.execute(
        "INSERT INTO courses(id, code, name, description, credits, hours, department_id, marking_scheme_json)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &course_id,
            &code,
            &name,
            get_optional_str(params, "description")?,
            credits,
            hours,
            &department_id,
            &marking_scheme,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new("conflict", "course code already exists")
                .with_details(json!({ "code": code }))
        } else {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "courses" }))
        }
    })?;
    Ok(json!({ "courseId": course_id, "code": code, "name": name }))
}

fn courses_list(conn: &Connection, _params: &Value) -> HandlerResult {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.code, c.name, c.description, c.credits, c.hours, c.department_id, d.name, c.marking_scheme_json
             FROM courses c
             LEFT JOIN departments d ON d.id = c.department_id
             ORDER BY c.code",
        )
        .map_err(HandlerErr::query)?;
    let courses = stmt
        .query_map([], |r| {
            let scheme: Option<String> = r.get(8)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
                "credits": r.get::<_, f64>(4)?,
                "hours": r.get::<_, f64>(5)?,
                "departmentId": r.get::<_, Option<String>>(6)?,
                "departmentName": r.get::<_, Option<String>>(7)?,
                "markingScheme": scheme.and_then(|s| serde_json::from_str::<Value>(&s).ok())
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "courses": courses }))
}

fn instructors_create(conn: &Connection, params: &Value) -> HandlerResult {
    let department_id = get_optional_str(params, "departmentId")?;
    if let Some(d) = department_id.as_deref() {
        require_row(conn, "departments", d, "department")?;
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let user_id = insert_user(&tx, params)?;
    let instructor_id = new_id();
    tx.execute(
        "INSERT INTO instructors(id, user_id, department_id, degree, specialization) VALUES(?, ?, ?, ?, ?)",
        (
            &instructor_id,
            &user_id,
            &department_id,
            get_optional_str(params, "degree")?,
            get_optional_str(params, "specialization")?,
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "instructors" }))
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "instructorId": instructor_id, "userId": user_id }))
}

const USER_CARD_COLUMNS: &str = "u.full_name, u.email, u.phone, u.city, u.date_of_birth, u.telegram_username,
     u.outlook_email, u.gender, ec.contact_name, ec.email, ec.phone, ec.relation";

/// Reads the user card columns starting at `base`.
fn user_card_from_row(r: &Row<'_>, base: usize) -> rusqlite::Result<Value> {
    let gender: Option<String> = r.get(base + 7)?;
    let contact_name: Option<String> = r.get(base + 8)?;
    let emergency = match contact_name {
        Some(name) => json!({
            "name": name,
            "email": r.get::<_, Option<String>>(base + 9)?,
            "phone": r.get::<_, Option<String>>(base + 10)?,
            "relation": r.get::<_, Option<String>>(base + 11)?
        }),
        None => Value::Null,
    };
    Ok(json!({
        "name": r.get::<_, String>(base)?,
        "email": r.get::<_, String>(base + 1)?,
        "phone": r.get::<_, Option<String>>(base + 2)?,
        "city": r.get::<_, Option<String>>(base + 3)?,
        "dateOfBirth": r.get::<_, Option<String>>(base + 4)?,
        "telegramUsername": r.get::<_, Option<String>>(base + 5)?,
        "outlookMail": r.get::<_, Option<String>>(base + 6)?,
        "gender": gender_display(gender.as_deref()),
        "emergencyContact": emergency
    }))
}

fn instructors_list(conn: &Connection, _params: &Value) -> HandlerResult {
    let sql = format!(
        "SELECT i.id, i.degree, i.specialization, i.department_id, d.name, {}
         FROM instructors i
         JOIN users u ON u.id = i.user_id
         LEFT JOIN emergency_contacts ec ON ec.id = u.emergency_contact_id
         LEFT JOIN departments d ON d.id = i.department_id
         ORDER BY u.full_name",
        USER_CARD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let instructors = stmt
        .query_map([], |r| {
            let mut card = user_card_from_row(r, 5)?;
            card["id"] = json!(r.get::<_, String>(0)?);
            card["degree"] = json!(r.get::<_, Option<String>>(1)?);
            card["specialization"] = json!(r.get::<_, Option<String>>(2)?);
            card["departmentId"] = json!(r.get::<_, Option<String>>(3)?);
            card["departmentName"] = json!(r.get::<_, Option<String>>(4)?);
            Ok(card)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "instructors": instructors }))
}

fn students_create(conn: &Connection, params: &Value) -> HandlerResult {
    let roll_no = get_required_str(params, "rollNo")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let user_id = insert_user(&tx, params)?;
    let student_id = new_id();
    tx.execute(
        "INSERT INTO students(id, user_id, roll_no) VALUES(?, ?, ?)",
        (&student_id, &user_id, &roll_no),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "students" }))
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "studentId": student_id, "userId": user_id, "rollNo": roll_no }))
}

/// Approval card for one student, `None` when the id is unknown.
pub fn student_card(conn: &Connection, student_id: &str) -> Result<Option<Value>, HandlerErr> {
    let sql = format!(
        "SELECT s.id, s.roll_no, {}
         FROM students s
         JOIN users u ON u.id = s.user_id
         LEFT JOIN emergency_contacts ec ON ec.id = u.emergency_contact_id
         WHERE s.id = ?",
        USER_CARD_COLUMNS
    );
    conn.query_row(&sql, [student_id], |r| {
        let mut card = user_card_from_row(r, 2)?;
        card["id"] = json!(r.get::<_, String>(0)?);
        card["rollNo"] = json!(r.get::<_, String>(1)?);
        Ok(card)
    })
    .optional()
    .map_err(HandlerErr::query)
}

fn students_list(conn: &Connection, _params: &Value) -> HandlerResult {
    let mut stmt = conn
        .prepare(
            "SELECT s.id FROM students s JOIN users u ON u.id = s.user_id ORDER BY s.roll_no, u.full_name",
        )
        .map_err(HandlerErr::query)?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let mut students = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(card) = student_card(conn, &id)? {
            students.push(card);
        }
    }
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "terms.create" => terms_create,
        "terms.list" => terms_list,
        "degrees.create" => degrees_create,
        "degrees.list" => degrees_list,
        "semesters.create" => semesters_create,
        "semesters.list" => semesters_list,
        "departments.create" => departments_create,
        "courses.create" => courses_create,
        "courses.list" => courses_list,
        "instructors.create" => instructors_create,
        "instructors.list" => instructors_list,
        "students.create" => students_create,
        "students.list" => students_list,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syllabus_defaults_to_core_and_lowercases_types() {
        let parsed = parse_syllabus(Some(&json!([
            { "courseCode": "CS101" },
            { "courseCode": " MA102 ", "type": "Supportive" }
        ])))
        .ok()
        .expect("valid syllabus");
        assert_eq!(
            parsed,
            json!([
                { "courseCode": "CS101", "type": "core" },
                { "courseCode": "MA102", "type": "supportive" }
            ])
        );
    }

    #[test]
    fn syllabus_rejects_unknown_types() {
        let res = parse_syllabus(Some(&json!([{ "courseCode": "CS101", "type": "optional" }])));
        assert!(res.is_err());
    }

    #[test]
    fn gender_codes_are_displayed() {
        assert_eq!(gender_display(Some("m")).as_deref(), Some("Male"));
        assert_eq!(gender_display(Some("F")).as_deref(), Some("Female"));
        assert_eq!(gender_display(Some("nonbinary")).as_deref(), Some("nonbinary"));
        assert_eq!(gender_display(None), None);
    }
}
