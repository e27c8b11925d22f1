use crate::calc::{AssessmentType, WeightScheme};
use crate::ipc::handlers::conference::{conferences_json, now_param};
use crate::ipc::handlers::setup::{section_or_default, SetupSection};
use crate::ipc::helpers::{
    get_optional_f64, get_optional_str, get_required_f64, get_required_str, new_id, now_rfc3339,
    parse_json_column, require_row, with_conn, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{course_result_for, CourseResultOutcome, SqliteResultSource};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};

/// One course offering: a course taught to a batch in a term.
pub struct Offering {
    pub batch_instructor_id: String,
    pub course_code: String,
    pub course_name: String,
    pub credits: f64,
    pub hours: f64,
    pub description: Option<String>,
    pub marking_scheme: Option<String>,
    pub term_id: String,
    pub term_name: String,
    pub batch_name: String,
    pub degree_name: String,
    pub semester_name: String,
    pub instructor_name: Option<String>,
    pub instructor_email: Option<String>,
}

impl Offering {
    pub fn load(conn: &Connection, batch_instructor_id: &str) -> Result<Self, HandlerErr> {
        let found = conn
            .query_row(
                "SELECT c.code, c.name, c.credits, c.hours, c.description, c.marking_scheme_json,
                        t.id, t.name, b.name, d.name, s.name, u.full_name, u.email
                 FROM batch_instructors bi
                 JOIN courses c ON c.id = bi.course_id
                 JOIN batches b ON b.id = bi.batch_id
                 JOIN terms t ON t.id = b.term_id
                 JOIN semesters s ON s.id = b.semester_id
                 JOIN degrees d ON d.id = s.degree_id
                 LEFT JOIN instructors i ON i.id = bi.instructor_id
                 LEFT JOIN users u ON u.id = i.user_id
                 WHERE bi.id = ?",
                [batch_instructor_id],
                |r| {
                    Ok(Offering {
                        batch_instructor_id: batch_instructor_id.to_string(),
                        course_code: r.get(0)?,
                        course_name: r.get(1)?,
                        credits: r.get(2)?,
                        hours: r.get(3)?,
                        description: r.get(4)?,
                        marking_scheme: r.get(5)?,
                        term_id: r.get(6)?,
                        term_name: r.get(7)?,
                        batch_name: r.get(8)?,
                        degree_name: r.get(9)?,
                        semester_name: r.get(10)?,
                        instructor_name: r.get(11)?,
                        instructor_email: r.get(12)?,
                    })
                },
            )
            .optional()
            .map_err(HandlerErr::query)?;
        found.ok_or_else(|| {
            HandlerErr::not_found("batch instructor not found")
                .with_details(json!({ "id": batch_instructor_id }))
        })
    }

    pub fn course_title(&self) -> String {
        format!("{} ({})", self.course_code, self.course_name)
    }

    pub fn batch_label(&self) -> String {
        format!("{} ({})", self.degree_name, self.semester_name)
    }

    fn to_json(&self) -> Value {
        json!({
            "batchInstructorId": self.batch_instructor_id,
            "courseCode": self.course_code,
            "courseName": self.course_name,
            "courseTitle": self.course_title(),
            "credits": self.credits,
            "hours": self.hours,
            "description": self.description,
            "termId": self.term_id,
            "termName": self.term_name,
            "batchName": self.batch_name,
            "batch": self.batch_label(),
            "instructor": self.instructor_name
        })
    }
}

/// Students with an approved enrollment in an offering, as
/// `(enrollment course id, student id)`.
fn enrolled_students(
    conn: &Connection,
    batch_instructor_id: &str,
) -> Result<Vec<(String, String)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT ec.id, sf.student_id
             FROM enrollment_courses ec
             JOIN enrollments e ON e.id = ec.enrollment_id
             JOIN sis_forms sf ON sf.id = e.sis_form_id
             JOIN students st ON st.id = sf.student_id
             WHERE ec.batch_instructor_id = ? AND e.status = 'approved'
             ORDER BY st.roll_no, ec.rowid",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([batch_instructor_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(rows)
}

fn course_overview(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    let offering = Offering::load(conn, &batch_instructor_id)?;
    let now = now_param(params)?;
    let types: Vec<&str> = AssessmentType::ALL.iter().map(|t| t.label()).collect();
    Ok(json!({
        "course": offering.to_json(),
        "assessmentTypes": types,
        "conferences": conferences_json(conn, &batch_instructor_id, now)?
    }))
}

fn scheme_row(conn: &Connection, batch_instructor_id: &str) -> Result<Option<(String, Value)>, HandlerErr> {
    conn.query_row(
        "SELECT id, scheme_json FROM assessment_schemes WHERE batch_instructor_id = ?",
        [batch_instructor_id],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?)),
    )
    .optional()
    .map(|row| row.map(|(id, raw)| (id, parse_json_column(raw, json!({})))))
    .map_err(HandlerErr::query)
}

fn normalized_scheme(scheme: &WeightScheme) -> Value {
    let mut out = Map::new();
    for (category, weight) in scheme.iter() {
        out.insert(category.to_string(), json!(weight));
    }
    Value::Object(out)
}

/// Course default scheme, normalized; an unusable default is empty.
fn course_default_scheme(offering: &Offering) -> Value {
    let default = parse_json_column(offering.marking_scheme.clone(), Value::Null);
    match WeightScheme::from_json(Some(&default)) {
        Ok(s) => normalized_scheme(&s),
        Err(e) => {
            if !default.is_null() {
                tracing::warn!(course = %offering.course_code, error = %e, "course marking scheme unusable; starting empty");
            }
            json!({})
        }
    }
}

fn is_empty_scheme(scheme: &Value) -> bool {
    scheme.as_object().map_or(true, |o| o.is_empty())
}

fn schemes_get(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    let offering = Offering::load(conn, &batch_instructor_id)?;
    if let Some((scheme_id, mut scheme)) = scheme_row(conn, &batch_instructor_id)? {
        // An empty stored scheme is refilled from the course default.
        if is_empty_scheme(&scheme) {
            let default = course_default_scheme(&offering);
            if !is_empty_scheme(&default) {
                conn.execute(
                    "UPDATE assessment_schemes SET scheme_json = ? WHERE id = ?",
                    (default.to_string(), &scheme_id),
                )
                .map_err(|e| {
                    HandlerErr::db("db_update_failed", e)
                        .with_details(json!({ "table": "assessment_schemes" }))
                })?;
                scheme = default;
            }
        }
        return Ok(json!({
            "batchInstructorId": batch_instructor_id,
            "schemeId": scheme_id,
            "scheme": scheme,
            "created": false
        }));
    }

    let scheme = course_default_scheme(&offering);
    let scheme_id = new_id();
    conn.execute(
        "INSERT INTO assessment_schemes(id, batch_instructor_id, scheme_json) VALUES(?, ?, ?)",
        (&scheme_id, &batch_instructor_id, scheme.to_string()),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "assessment_schemes" }))
    })?;
    Ok(json!({
        "batchInstructorId": batch_instructor_id,
        "schemeId": scheme_id,
        "scheme": scheme,
        "created": true
    }))
}

fn schemes_set(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    require_row(conn, "batch_instructors", &batch_instructor_id, "batch instructor")?;
    let parsed = WeightScheme::from_json(params.get("scheme"))
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let scheme = normalized_scheme(&parsed);

    conn.execute(
        "INSERT INTO assessment_schemes(id, batch_instructor_id, scheme_json) VALUES(?, ?, ?)
         ON CONFLICT(batch_instructor_id) DO UPDATE SET scheme_json = excluded.scheme_json",
        (new_id(), &batch_instructor_id, scheme.to_string()),
    )
    .map_err(|e| {
        HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "assessment_schemes" }))
    })?;
    Ok(json!({ "batchInstructorId": batch_instructor_id, "scheme": scheme }))
}

fn assessments_list(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    require_row(conn, "batch_instructors", &batch_instructor_id, "batch instructor")?;
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.due_date, a.assessment_type, a.total_mark
             FROM assessments a
             JOIN assessment_schemes s ON s.id = a.scheme_id
             WHERE s.batch_instructor_id = ?
             ORDER BY a.created_at, a.rowid",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&batch_instructor_id], |r| {
            let kind: String = r.get(3)?;
            Ok((
                kind.clone(),
                json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "endTime": r.get::<_, Option<String>>(2)?,
                    "type": kind,
                    "totalMark": r.get::<_, f64>(4)?
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut groups = Map::new();
    for (kind, item) in rows {
        if let Some(list) = groups
            .entry(kind)
            .or_insert_with(|| json!([]))
            .as_array_mut()
        {
            list.push(item);
        }
    }
    Ok(json!({ "batchInstructorId": batch_instructor_id, "assessments": groups }))
}

fn seed_types(conn: &Connection) -> Vec<String> {
    section_or_default(conn, SetupSection::Assessments)
        .get("seedResultTypes")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn default_total_mark(conn: &Connection) -> f64 {
    section_or_default(conn, SetupSection::Assessments)
        .get("defaultTotalMark")
        .and_then(|v| v.as_f64())
        .unwrap_or(100.0)
}

fn assessments_create(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    let raw_type = get_required_str(params, "type")?;
    let Some(kind) = AssessmentType::from_label(&raw_type) else {
        return Err(HandlerErr::bad_params("unknown assessment type")
            .with_details(json!({ "type": raw_type })));
    };
    let total_mark = match get_optional_f64(params, "totalMark")? {
        Some(t) if t < 0.0 => return Err(HandlerErr::bad_params("totalMark must be >= 0")),
        Some(t) => t,
        None => default_total_mark(conn),
    };
    let due_date = get_optional_str(params, "dueDate")?;

    require_row(conn, "batch_instructors", &batch_instructor_id, "batch instructor")?;
    let no_scheme = || {
        HandlerErr::new(
            "no_scheme",
            "set up the assessment scheme before creating assessments",
        )
        .with_details(json!({ "batchInstructorId": batch_instructor_id }))
    };
    let Some((scheme_id, scheme_json)) = scheme_row(conn, &batch_instructor_id)? else {
        return Err(no_scheme());
    };
    let scheme = WeightScheme::from_json(Some(&scheme_json)).unwrap_or_default();
    if scheme.is_empty() {
        return Err(no_scheme());
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let existing: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM assessments WHERE scheme_id = ? AND assessment_type = ?",
            (&scheme_id, kind.label()),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    let assessment_id = new_id();
    let title = format!("{} {}", kind.label(), existing + 1);
    tx.execute(
        "INSERT INTO assessments(id, scheme_id, assessment_type, title, total_mark, due_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &assessment_id,
            &scheme_id,
            kind.label(),
            &title,
            total_mark,
            &due_date,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "assessments" }))
    })?;

    let mut seeded = 0usize;
    if seed_types(conn).iter().any(|t| t == kind.label()) {
        for (_, student_id) in enrolled_students(&tx, &batch_instructor_id)? {
            seeded += tx
                .execute(
                    "INSERT OR IGNORE INTO assessment_results(id, assessment_id, student_id, mark)
                     VALUES(?, ?, ?, 0)",
                    (new_id(), &assessment_id, &student_id),
                )
                .map_err(|e| {
                    HandlerErr::db("db_insert_failed", e)
                        .with_details(json!({ "table": "assessment_results" }))
                })?;
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({
        "assessmentId": assessment_id,
        "title": title,
        "type": kind.label(),
        "totalMark": total_mark,
        "weight": scheme.weight(kind.label()),
        "finalExam": kind.is_reserved(),
        "seededResults": seeded
    }))
}

fn assessments_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let assessment_id = get_required_str(params, "assessmentId")?;
    require_row(conn, "assessments", &assessment_id, "assessment")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let results = tx
        .execute(
            "DELETE FROM assessment_results WHERE assessment_id = ?",
            [&assessment_id],
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM assessments WHERE id = ?", [&assessment_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "ok": true, "deletedResults": results }))
}

fn results_record(conn: &Connection, params: &Value) -> HandlerResult {
    let assessment_id = get_required_str(params, "assessmentId")?;
    let student_id = get_required_str(params, "studentId")?;
    let mark = get_required_f64(params, "mark")?;
    if mark < 0.0 {
        return Err(HandlerErr::bad_params("mark must be >= 0"));
    }
    require_row(conn, "assessments", &assessment_id, "assessment")?;
    require_row(conn, "students", &student_id, "student")?;
    conn.execute(
        "INSERT INTO assessment_results(id, assessment_id, student_id, mark) VALUES(?, ?, ?, ?)
         ON CONFLICT(assessment_id, student_id) DO UPDATE SET mark = excluded.mark",
        (new_id(), &assessment_id, &student_id, mark),
    )
    .map_err(|e| {
        HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "assessment_results" }))
    })?;
    Ok(json!({ "ok": true, "assessmentId": assessment_id, "studentId": student_id, "mark": mark }))
}

fn results_list(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    let offering = Offering::load(conn, &batch_instructor_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.total_mark
             FROM assessments a
             JOIN assessment_schemes s ON s.id = a.scheme_id
             WHERE s.batch_instructor_id = ?
             ORDER BY a.created_at, a.rowid",
        )
        .map_err(HandlerErr::query)?;
    let assessments: Vec<(String, String, f64)> = stmt
        .query_map([&batch_instructor_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut score_stmt = conn
        .prepare("SELECT mark FROM assessment_results WHERE assessment_id = ? AND student_id = ?")
        .map_err(HandlerErr::query)?;
    let mut students = Vec::new();
    for (_, student_id) in enrolled_students(conn, &batch_instructor_id)? {
        let (name, roll_no, phone, email): (String, String, Option<String>, String) = conn
            .query_row(
                "SELECT u.full_name, s.roll_no, u.phone, u.email
                 FROM students s JOIN users u ON u.id = s.user_id
                 WHERE s.id = ?",
                [&student_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .map_err(HandlerErr::query)?;
        let mut scores = Vec::with_capacity(assessments.len());
        for (assessment_id, title, total) in &assessments {
            let score: Option<f64> = score_stmt
                .query_row((assessment_id, &student_id), |r| r.get(0))
                .optional()
                .map_err(HandlerErr::query)?;
            scores.push(json!({ "title": title, "score": score, "total": total }));
        }
        students.push(json!({
            "studentId": student_id,
            "name": name,
            "rollNo": roll_no,
            "phone": phone,
            "email": email,
            "assessments": scores
        }));
    }

    Ok(json!({
        "courseTitle": offering.course_title(),
        "term": &offering.term_name,
        "batch": offering.batch_label(),
        "students": students
    }))
}

fn results_course_results(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    let offering = Offering::load(conn, &batch_instructor_id)?;
    let source = SqliteResultSource::new(conn);

    let mut entries = Vec::new();
    for (enrollment_course_id, student_id) in enrolled_students(conn, &batch_instructor_id)? {
        let mut entry = json!({
            "enrollmentCourseId": enrollment_course_id,
            "studentId": student_id,
            "result": Value::Null
        });
        match course_result_for(&source, &batch_instructor_id, &student_id) {
            CourseResultOutcome::Computed(result) => {
                entry["continuousTotal"] = json!(result.continuous_total());
                entry["result"] = serde_json::to_value(&result)
                    .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
            }
            CourseResultOutcome::NoScheme(e) => {
                entry["error"] = json!({ "code": "no_scheme", "message": e.to_string() });
            }
            CourseResultOutcome::Empty => {}
        }
        entries.push(entry);
    }
    Ok(json!({
        "courseTitle": offering.course_title(),
        "results": entries
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "course.overview" => course_overview,
        "schemes.get" => schemes_get,
        "schemes.set" => schemes_set,
        "assessments.list" => assessments_list,
        "assessments.create" => assessments_create,
        "assessments.delete" => assessments_delete,
        "results.record" => results_record,
        "results.list" => results_list,
        "results.courseResults" => results_course_results,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
