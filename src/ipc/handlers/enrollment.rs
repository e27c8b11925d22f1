use crate::calc::{
    categorize_by_failure_count, count_failures, grade_for_total, is_failing_score,
    round_off_2_decimals, term_gpa, FailureBucket,
};
use crate::ipc::handlers::batches::term_name;
use crate::ipc::handlers::catalog::{split_semester_number, student_card};
use crate::ipc::handlers::setup::{section_or_default, SetupSection};
use crate::ipc::handlers::sis::sis_form_for;
use crate::ipc::helpers::{
    get_optional_str, get_required_f64, get_required_str, get_str_array, new_id, now_rfc3339,
    parse_json_column, require_row, with_conn, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const SYLLABUS_GROUPS: [&str; 4] = ["Core", "Supportive", "Elective", "Extracurricular"];
const RETAKE_GROUP: &str = "Retake";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnrollmentStatus {
    Pending,
    Approved,
    Rejected,
}

impl EnrollmentStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// One course line of a stored term result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CourseGrade {
    pub course_name: String,
    pub course_code: String,
    pub credits: f64,
    pub letter_grade: String,
    pub grade_score: f64,
    pub grade_point: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct TermResult {
    data: Vec<CourseGrade>,
}

/// Missing or unreadable results count as "no results yet".
fn parse_term_result(raw: Option<String>) -> Option<Vec<CourseGrade>> {
    let raw = raw?;
    match serde_json::from_str::<TermResult>(&raw) {
        Ok(r) if !r.data.is_empty() => Some(r.data),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "stored enrollment result unreadable; treated as absent");
            None
        }
    }
}

#[derive(Debug, Clone)]
struct ApprovedEnrollment {
    semester_id: String,
    semester_name: String,
    degree_id: String,
    results: Option<Vec<CourseGrade>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Progression {
    FirstSemester,
    /// Approved but not yet graded: stay on the same track.
    AwaitingResults { semester_id: String },
    Blocked { semester_id: String },
    Advance {
        degree_id: String,
        semester_name: String,
        retakes: Vec<String>,
    },
}

impl Progression {
    fn key(&self) -> &'static str {
        match self {
            Self::FirstSemester => "firstSemester",
            Self::AwaitingResults { .. } => "awaitingResults",
            Self::Blocked { .. } => "blocked",
            Self::Advance { .. } => "advance",
        }
    }

    fn retakes(&self) -> &[String] {
        match self {
            Self::Advance { retakes, .. } => retakes,
            _ => &[],
        }
    }
}

/// "Semester 3" becomes "Semester 4"; names without a trailing number have no successor.
fn next_semester_name(name: &str) -> Option<String> {
    let (prefix, n) = split_semester_number(name)?;
    Some(format!("{} {}", prefix, n.checked_add(1)?))
}

fn decide_progression(latest: Option<&ApprovedEnrollment>) -> Progression {
    let Some(latest) = latest else {
        return Progression::FirstSemester;
    };
    let Some(results) = latest.results.as_ref() else {
        return Progression::AwaitingResults {
            semester_id: latest.semester_id.clone(),
        };
    };
    let scores = results.iter().map(|c| c.grade_score);
    if categorize_by_failure_count(scores) == FailureBucket::Blocking {
        return Progression::Blocked {
            semester_id: latest.semester_id.clone(),
        };
    }
    let Some(semester_name) = next_semester_name(&latest.semester_name) else {
        tracing::warn!(semester = %latest.semester_name, "semester name has no successor; repeating");
        return Progression::AwaitingResults {
            semester_id: latest.semester_id.clone(),
        };
    };
    Progression::Advance {
        degree_id: latest.degree_id.clone(),
        semester_name,
        retakes: results
            .iter()
            .filter(|c| is_failing_score(c.grade_score))
            .map(|c| c.course_code.clone())
            .collect(),
    }
}

fn latest_approved(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<ApprovedEnrollment>, HandlerErr> {
    conn.query_row(
        "SELECT s.id, s.name, s.degree_id, e.result_json
         FROM enrollments e
         JOIN sis_forms sf ON sf.id = e.sis_form_id
         JOIN batches b ON b.id = e.batch_id
         JOIN semesters s ON s.id = b.semester_id
         WHERE sf.student_id = ? AND e.status = 'approved'
         ORDER BY e.created_at DESC, e.rowid DESC
         LIMIT 1",
        [student_id],
        |r| {
            Ok(ApprovedEnrollment {
                semester_id: r.get(0)?,
                semester_name: r.get(1)?,
                degree_id: r.get(2)?,
                results: parse_term_result(r.get(3)?),
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn batches_where(conn: &Connection, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Value>, HandlerErr> {
    let sql = format!(
        "SELECT b.id, b.name, d.code
         FROM batches b
         JOIN semesters s ON s.id = b.semester_id
         JOIN degrees d ON d.id = s.degree_id
         WHERE {}
         ORDER BY b.name",
        filter
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map(args, |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "degreeCode": r.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(rows)
}

fn enrollment_batches_for_term(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let term_id = get_required_str(params, "termId")?;
    require_row(conn, "students", &student_id, "student")?;
    require_row(conn, "terms", &term_id, "term")?;

    let progression = decide_progression(latest_approved(conn, &student_id)?.as_ref());
    let batches = match &progression {
        Progression::FirstSemester => {
            let first = section_or_default(conn, SetupSection::Enrollment)
                .get("firstSemesterName")
                .and_then(|v| v.as_str())
                .unwrap_or("Semester 1")
                .to_string();
            batches_where(conn, "b.term_id = ?1 AND s.name = ?2", &[&term_id, &first])?
        }
        Progression::AwaitingResults { semester_id } | Progression::Blocked { semester_id } => {
            batches_where(conn, "b.term_id = ?1 AND s.id = ?2", &[&term_id, semester_id])?
        }
        Progression::Advance {
            degree_id,
            semester_name,
            ..
        } => batches_where(
            conn,
            "b.term_id = ?1 AND s.name = ?2 AND s.degree_id = ?3",
            &[&term_id, semester_name, degree_id],
        )?,
    };

    Ok(json!({
        "success": true,
        "decision": progression.key(),
        "batches": batches,
        "retakes": progression.retakes()
    }))
}

fn course_entry(conn: &Connection, code: &str, kind: &str) -> Result<Option<Value>, HandlerErr> {
    conn.query_row(
        "SELECT id, code, name, description, credits, hours FROM courses WHERE code = ?",
        [code],
        |r| {
            Ok(json!({
                "courseId": r.get::<_, String>(0)?,
                "courseCode": r.get::<_, String>(1)?,
                "courseName": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
                "credits": r.get::<_, f64>(4)?,
                "totalHours": r.get::<_, f64>(5)?,
                "type": kind
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn capitalize(s: &str) -> String {
    let lower = s.trim().to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn enrollment_courses_for_batch(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_id = get_required_str(params, "batchId")?;
    let student_id = get_optional_str(params, "studentId")?;
    let syllabus: Option<Option<String>> = conn
        .query_row(
            "SELECT s.syllabus_json FROM batches b JOIN semesters s ON s.id = b.semester_id WHERE b.id = ?",
            [&batch_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(syllabus) = syllabus else {
        return Err(HandlerErr::not_found("batch not found").with_details(json!({ "id": batch_id })));
    };

    let mut grouped = Map::new();
    for group in SYLLABUS_GROUPS.iter().chain([RETAKE_GROUP].iter()) {
        grouped.insert(group.to_string(), json!([]));
    }
    let items = parse_json_column(syllabus, json!([]));
    for item in items.as_array().into_iter().flatten() {
        let Some(code) = item.get("courseCode").and_then(|v| v.as_str()) else {
            continue;
        };
        let group = capitalize(item.get("type").and_then(|v| v.as_str()).unwrap_or("core"));
        if let Some(entry) = course_entry(conn, code, &group)? {
            if let Some(list) = grouped
                .entry(group)
                .or_insert_with(|| json!([]))
                .as_array_mut()
            {
                list.push(entry);
            }
        }
    }

    if let Some(student_id) = student_id {
        let progression = decide_progression(latest_approved(conn, &student_id)?.as_ref());
        for code in progression.retakes() {
            if let Some(entry) = course_entry(conn, code, "RETAKE")? {
                if let Some(list) = grouped.get_mut(RETAKE_GROUP).and_then(|v| v.as_array_mut()) {
                    list.push(entry);
                }
            }
        }
    }

    Ok(json!({ "success": true, "courses": grouped }))
}

fn ensure_sis_form(conn: &Connection, student_id: &str) -> Result<String, HandlerErr> {
    if let Some((form_id, _, _)) = sis_form_for(conn, student_id)? {
        return Ok(form_id);
    }
    let required = section_or_default(conn, SetupSection::Enrollment)
        .get("requireSisForm")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    if required {
        return Err(HandlerErr::bad_params(
            "fill the Student Information System (SIS) form before enrolling",
        )
        .with_details(json!({ "studentId": student_id })));
    }
    let form_id = new_id();
    conn.execute(
        "INSERT INTO sis_forms(id, student_id, created_at, form_json) VALUES(?, ?, ?, '{}')",
        (&form_id, student_id, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "sis_forms" })))?;
    Ok(form_id)
}

fn enrollment_save(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let batch_id = get_required_str(params, "batchId")?;
    let course_ids = get_str_array(params, "courseIds")?;
    if course_ids.is_empty() {
        return Err(HandlerErr::bad_params("select at least one course"));
    }
    require_row(conn, "students", &student_id, "student")?;
    require_row(conn, "batches", &batch_id, "batch")?;
    for course_id in &course_ids {
        require_row(conn, "courses", course_id, "course")?;
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let sis_form_id = ensure_sis_form(&tx, &student_id)?;
    let enrollment_id = new_id();
    tx.execute(
        "INSERT INTO enrollments(id, batch_id, sis_form_id, status, selected_json, created_at)
         VALUES(?, ?, ?, 'pending', ?, ?)",
        (
            &enrollment_id,
            &batch_id,
            &sis_form_id,
            json!({ "ids": course_ids }).to_string(),
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "enrollments" })))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(student_id = %student_id, batch_id = %batch_id, "enrollment requested");
    Ok(json!({
        "success": true,
        "enrollmentId": enrollment_id,
        "message": "Enrollment Requested Successfully"
    }))
}

fn selected_ids(raw: Option<String>) -> Vec<String> {
    parse_json_column(raw, json!({}))
        .get("ids")
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn enrollment_pending(conn: &Connection, _params: &Value) -> HandlerResult {
    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.created_at, e.selected_json, b.id, b.name, sf.student_id
             FROM enrollments e
             JOIN batches b ON b.id = e.batch_id
             JOIN sis_forms sf ON sf.id = e.sis_form_id
             WHERE e.status = 'pending'
             ORDER BY e.created_at, e.rowid",
        )
        .map_err(HandlerErr::query)?;
    let rows: Vec<(String, String, Option<String>, String, String, String)> = stmt
        .query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut out = Vec::with_capacity(rows.len());
    for (enrollment_id, created_at, selected, batch_id, batch_name, student_id) in rows {
        let mut courses = Vec::new();
        for course_id in selected_ids(selected) {
            let course: Option<(String, String)> = conn
                .query_row(
                    "SELECT code, name FROM courses WHERE id = ?",
                    [&course_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(HandlerErr::query)?;
            if let Some((code, name)) = course {
                courses.push(json!({ "id": course_id, "code": code, "name": name }));
            }
        }
        out.push(json!({
            "enrollmentId": enrollment_id,
            "createdAt": created_at,
            "batch": { "id": batch_id, "name": batch_name },
            "student": student_card(conn, &student_id)?,
            "selectedCourses": courses
        }));
    }
    Ok(json!({ "enrollments": out }))
}

/// Batch instructor teaching `course_id` to the enrollment's batch, or for a
/// retake, to any batch of the same term.
fn batch_instructor_for(
    conn: &Connection,
    batch_id: &str,
    term_id: &str,
    course_id: &str,
) -> Result<Option<String>, HandlerErr> {
    let own: Option<String> = conn
        .query_row(
            "SELECT id FROM batch_instructors WHERE batch_id = ? AND course_id = ? ORDER BY rowid LIMIT 1",
            (batch_id, course_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if own.is_some() {
        return Ok(own);
    }
    conn.query_row(
        "SELECT bi.id
         FROM batch_instructors bi
         JOIN batches b ON b.id = bi.batch_id
         WHERE b.term_id = ? AND bi.course_id = ?
         ORDER BY bi.rowid
         LIMIT 1",
        (term_id, course_id),
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn enrollment_set_status(conn: &Connection, params: &Value) -> HandlerResult {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let raw_status = get_required_str(params, "status")?;
    let Some(status) = EnrollmentStatus::parse(&raw_status) else {
        return Err(HandlerErr::bad_params("status must be pending, approved or rejected")
            .with_details(json!({ "status": raw_status })));
    };
    let row: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT e.batch_id, b.term_id, e.selected_json
             FROM enrollments e JOIN batches b ON b.id = e.batch_id
             WHERE e.id = ?",
            [&enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((batch_id, term_id, selected)) = row else {
        return Err(HandlerErr::not_found("enrollment not found")
            .with_details(json!({ "id": enrollment_id })));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "UPDATE enrollments SET status = ? WHERE id = ?",
        (status.as_str(), &enrollment_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "enrollments" })))?;

    let mut enrolled = 0usize;
    let mut unmatched: Vec<String> = Vec::new();
    let mut withdrawn = 0usize;
    if status != EnrollmentStatus::Approved {
        withdrawn = tx
            .execute(
                "DELETE FROM enrollment_courses WHERE enrollment_id = ?",
                [&enrollment_id],
            )
            .map_err(|e| {
                HandlerErr::db("db_delete_failed", e)
                    .with_details(json!({ "table": "enrollment_courses" }))
            })?;
    } else {
        for course_id in selected_ids(selected) {
            let Some(bi_id) = batch_instructor_for(&tx, &batch_id, &term_id, &course_id)? else {
                tracing::warn!(enrollment_id = %enrollment_id, course_id = %course_id, "no offering for selected course this term");
                unmatched.push(course_id);
                continue;
            };
            enrolled += tx
                .execute(
                    "INSERT OR IGNORE INTO enrollment_courses(id, enrollment_id, batch_instructor_id) VALUES(?, ?, ?)",
                    (new_id(), &enrollment_id, &bi_id),
                )
                .map_err(|e| {
                    HandlerErr::db("db_insert_failed", e)
                        .with_details(json!({ "table": "enrollment_courses" }))
                })?;
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({
        "success": true,
        "status": status.as_str(),
        "enrolledCourses": enrolled,
        "withdrawnCourses": withdrawn,
        "unmatchedCourseIds": unmatched
    }))
}

fn enrollment_record_results(conn: &Connection, params: &Value) -> HandlerResult {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    require_row(conn, "enrollments", &enrollment_id, "enrollment")?;
    let Some(lines) = params.get("courses").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("courses must be an array"));
    };

    let mut data = Vec::with_capacity(lines.len());
    for line in lines {
        let code = get_required_str(line, "courseCode")?;
        let total = get_required_f64(line, "totalMarks")?;
        if !(0.0..=100.0).contains(&total) {
            return Err(HandlerErr::bad_params("totalMarks must be in 0..=100")
                .with_details(json!({ "courseCode": code })));
        }
        let course: Option<(String, f64)> = conn
            .query_row(
                "SELECT name, credits FROM courses WHERE code = ?",
                [&code],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(HandlerErr::query)?;
        let Some((course_name, credits)) = course else {
            return Err(HandlerErr::not_found("course not found")
                .with_details(json!({ "courseCode": code })));
        };
        let band = grade_for_total(total);
        data.push(CourseGrade {
            course_name,
            course_code: code,
            credits,
            letter_grade: band.letter_grade.to_string(),
            grade_score: band.grade_score,
            grade_point: band.grade_score * credits,
        });
    }

    let result = TermResult { data };
    let raw = serde_json::to_string(&result)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    conn.execute(
        "UPDATE enrollments SET result_json = ? WHERE id = ?",
        (&raw, &enrollment_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "enrollments" })))?;

    let gpa = term_gpa(result.data.iter().map(|c| (c.credits, c.grade_score)));
    let failures = count_failures(result.data.iter().map(|c| c.grade_score));
    Ok(json!({
        "success": true,
        "termGpa": gpa.map(round_off_2_decimals),
        "failCount": failures,
        "data": result.data
    }))
}

/// Second newest term; classification runs on the term that just ended.
fn previous_term(conn: &Connection) -> Result<String, HandlerErr> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM terms ORDER BY created_at DESC, rowid DESC LIMIT 1 OFFSET 1",
            [],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    id.ok_or_else(|| HandlerErr::not_found("no previous term to classify"))
}

fn enrollment_classify_term(conn: &Connection, params: &Value) -> HandlerResult {
    let term_id = match get_optional_str(params, "termId")? {
        Some(id) => id,
        None => previous_term(conn)?,
    };
    let term_name = term_name(conn, &term_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.result_json, st.id, u.full_name, st.roll_no
             FROM enrollments e
             JOIN batches b ON b.id = e.batch_id
             JOIN sis_forms sf ON sf.id = e.sis_form_id
             JOIN students st ON st.id = sf.student_id
             JOIN users u ON u.id = st.user_id
             WHERE b.term_id = ?
             ORDER BY st.roll_no, e.rowid",
        )
        .map_err(HandlerErr::query)?;
    let rows: Vec<(String, Option<String>, String, String, String)> = stmt
        .query_map([&term_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut buckets = Map::new();
    for bucket in [
        FailureBucket::NoFailures,
        FailureBucket::SomeFailures,
        FailureBucket::Blocking,
    ] {
        buckets.insert(bucket.key().to_string(), json!([]));
    }
    for (enrollment_id, raw, student_id, name, roll_no) in rows {
        let scores: Vec<f64> = parse_term_result(raw)
            .unwrap_or_default()
            .iter()
            .map(|c| c.grade_score)
            .collect();
        let bucket = categorize_by_failure_count(scores.iter().copied());
        if let Some(list) = buckets.get_mut(bucket.key()).and_then(|v| v.as_array_mut()) {
            list.push(json!({
                "enrollmentId": enrollment_id,
                "studentId": student_id,
                "studentName": name,
                "rollNo": roll_no,
                "failCount": count_failures(scores)
            }));
        }
    }

    Ok(json!({ "termId": term_id, "termName": term_name, "buckets": buckets }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "enrollment.batchesForTerm" => enrollment_batches_for_term,
        "enrollment.coursesForBatch" => enrollment_courses_for_batch,
        "enrollment.save" => enrollment_save,
        "enrollment.pending" => enrollment_pending,
        "enrollment.setStatus" => enrollment_set_status,
        "enrollment.recordResults" => enrollment_record_results,
        "enrollment.classifyTerm" => enrollment_classify_term,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graded(scores: &[(&str, f64)]) -> ApprovedEnrollment {
        ApprovedEnrollment {
            semester_id: "sem-2".into(),
            semester_name: "Semester 2".into(),
            degree_id: "deg-cs".into(),
            results: Some(
                scores
                    .iter()
                    .map(|(code, score)| CourseGrade {
                        course_code: code.to_string(),
                        grade_score: *score,
                        ..CourseGrade::default()
                    })
                    .collect(),
            ),
        }
    }

    #[test]
    fn no_history_starts_at_first_semester() {
        assert_eq!(decide_progression(None), Progression::FirstSemester);
    }

    #[test]
    fn ungraded_enrollment_keeps_semester() {
        let mut latest = graded(&[]);
        latest.results = None;
        assert_eq!(
            decide_progression(Some(&latest)),
            Progression::AwaitingResults {
                semester_id: "sem-2".into()
            }
        );
    }

    #[test]
    fn some_failures_advance_with_retakes() {
        let latest = graded(&[("CS201", 1.0), ("CS202", 2.0), ("CS203", 3.3)]);
        assert_eq!(
            decide_progression(Some(&latest)),
            Progression::Advance {
                degree_id: "deg-cs".into(),
                semester_name: "Semester 3".into(),
                retakes: vec!["CS201".into()],
            }
        );
    }

    #[test]
    fn three_failures_block_progression() {
        let latest = graded(&[("A", 1.5), ("B", 1.0), ("C", 3.0), ("D", 1.8)]);
        let p = decide_progression(Some(&latest));
        assert_eq!(
            p,
            Progression::Blocked {
                semester_id: "sem-2".into()
            }
        );
        assert!(p.retakes().is_empty());
    }

    #[test]
    fn semester_successor_names() {
        assert_eq!(next_semester_name("Semester 9").as_deref(), Some("Semester 10"));
        assert_eq!(next_semester_name("Final Year"), None);
        assert_eq!(next_semester_name("Semester 4294967295"), None);
    }

    #[test]
    fn unreadable_results_count_as_absent() {
        assert_eq!(parse_term_result(Some("not json".into())), None);
        assert_eq!(parse_term_result(Some(r#"{"data": []}"#.into())), None);
        let parsed = parse_term_result(Some(
            r#"{"data": [{"courseCode": "CS101", "gradeScore": 3.7}]}"#.into(),
        ))
        .expect("one line");
        assert_eq!(parsed[0].grade_score, 3.7);
    }
}
