use crate::ipc::handlers::catalog::{degrees_json, semester_sort_key, semesters_json};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_str_array, new_id, parse_json_column, require_row,
    with_conn, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;

const BATCHES_OF_DEGREE: &str = "SELECT b.id
     FROM batches b
     JOIN semesters s ON s.id = b.semester_id
     WHERE b.term_id = ?1 AND s.degree_id = ?2";

pub fn term_name(conn: &Connection, term_id: &str) -> Result<String, HandlerErr> {
    let name: Option<String> = conn
        .query_row("SELECT name FROM terms WHERE id = ?", [term_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query)?;
    name.ok_or_else(|| HandlerErr::not_found("term not found").with_details(json!({ "id": term_id })))
}

fn batches_overview(conn: &Connection, params: &Value) -> HandlerResult {
    let term_id = get_required_str(params, "termId")?;
    let term_name = term_name(conn, &term_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT i.id, u.full_name, i.department_id
             FROM instructors i
             JOIN users u ON u.id = i.user_id
             ORDER BY u.full_name",
        )
        .map_err(HandlerErr::query)?;
    let instructors = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "department": r.get::<_, Option<String>>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut stmt = conn
        .prepare("SELECT id, name, semester_id FROM batches WHERE term_id = ? ORDER BY name")
        .map_err(HandlerErr::query)?;
    let batches = stmt
        .query_map([&term_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "semesterId": r.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "termId": term_id,
        "termName": term_name,
        "degrees": degrees_json(conn)?,
        "semesters": semesters_json(conn, None)?,
        "allInstructors": instructors,
        "batches": batches
    }))
}

fn syllabus_course_codes(raw: Option<String>) -> Vec<String> {
    parse_json_column(raw, json!([]))
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("courseCode").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn batches_edit(conn: &Connection, params: &Value) -> HandlerResult {
    let term_id = get_required_str(params, "termId")?;
    let semester_ids = get_str_array(params, "semesterIds")?;
    let term_name = term_name(conn, &term_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut created_batches = 0usize;
    let mut created_instructors = 0usize;
    for semester_id in &semester_ids {
        let semester: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT name, syllabus_json FROM semesters WHERE id = ?",
                [semester_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(HandlerErr::query)?;
        let Some((semester_name, syllabus)) = semester else {
            return Err(HandlerErr::not_found("semester not found")
                .with_details(json!({ "id": semester_id })));
        };

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM batches WHERE term_id = ? AND semester_id = ?",
                (&term_id, semester_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::query)?;
        if exists.is_some() {
            continue;
        }

        let batch_id = new_id();
        tx.execute(
            "INSERT INTO batches(id, term_id, semester_id, name) VALUES(?, ?, ?, ?)",
            (
                &batch_id,
                &term_id,
                semester_id,
                format!("{} {}", term_name, semester_name),
            ),
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "batches" }))
        })?;
        created_batches += 1;

        for code in syllabus_course_codes(syllabus) {
            let course_id: Option<String> = tx
                .query_row("SELECT id FROM courses WHERE code = ?", [&code], |r| r.get(0))
                .optional()
                .map_err(HandlerErr::query)?;
            let Some(course_id) = course_id else {
                tracing::warn!(course_code = %code, semester = %semester_name, "syllabus course not in catalog; skipped");
                continue;
            };
            tx.execute(
                "INSERT INTO batch_instructors(id, batch_id, course_id) VALUES(?, ?, ?)",
                (new_id(), &batch_id, &course_id),
            )
            .map_err(|e| {
                HandlerErr::db("db_insert_failed", e)
                    .with_details(json!({ "table": "batch_instructors" }))
            })?;
            created_instructors += 1;
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(term = %term_name, created_batches, created_instructors, "batches edited");
    Ok(json!({
        "success": true,
        "createdBatches": created_batches,
        "createdInstructors": created_instructors,
        "message": "Batch Data Edited Successfully"
    }))
}

struct BatchRow {
    batch_id: String,
    semester_id: String,
    semester_name: String,
    degree_id: String,
    degree_name: String,
}

fn batch_courses(conn: &Connection, batch_id: &str) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT bi.id, c.code, c.name, c.credits, c.hours, c.department_id, bi.room_json, i.id, u.full_name
             FROM batch_instructors bi
             JOIN courses c ON c.id = bi.course_id
             LEFT JOIN instructors i ON i.id = bi.instructor_id
             LEFT JOIN users u ON u.id = i.user_id
             WHERE bi.batch_id = ?
             ORDER BY bi.rowid",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([batch_id], |r| {
            let instructor_id: Option<String> = r.get(7)?;
            let instructor = match instructor_id {
                Some(id) => json!({ "id": id, "name": r.get::<_, Option<String>>(8)? }),
                None => Value::Null,
            };
            Ok((
                r.get::<_, String>(1)?,
                json!({
                    "batchInstructorId": r.get::<_, String>(0)?,
                    "courseCode": r.get::<_, String>(1)?,
                    "courseName": r.get::<_, String>(2)?,
                    "courseCredits": r.get::<_, f64>(3)?,
                    "courseHours": r.get::<_, f64>(4)?,
                    "departmentId": r.get::<_, Option<String>>(5)?,
                    "rooms": parse_json_column(r.get(6)?, json!({})),
                    "instructor": instructor
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut seen: HashSet<String> = HashSet::new();
    Ok(rows
        .into_iter()
        .filter(|(code, _)| seen.insert(code.clone()))
        .map(|(_, course)| course)
        .collect())
}

fn batches_list(conn: &Connection, params: &Value) -> HandlerResult {
    let term_id = get_required_str(params, "termId")?;
    let term_name = term_name(conn, &term_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT b.id, s.id, s.name, d.id, d.name
             FROM batches b
             JOIN semesters s ON s.id = b.semester_id
             JOIN degrees d ON d.id = s.degree_id
             WHERE b.term_id = ?
             ORDER BY d.name, d.id",
        )
        .map_err(HandlerErr::query)?;
    let mut rows = stmt
        .query_map([&term_id], |r| {
            Ok(BatchRow {
                batch_id: r.get(0)?,
                semester_id: r.get(1)?,
                semester_name: r.get(2)?,
                degree_id: r.get(3)?,
                degree_name: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    rows.sort_by_cached_key(|r| {
        (
            r.degree_name.clone(),
            r.degree_id.clone(),
            semester_sort_key(&r.semester_name),
        )
    });

    // Rows are grouped by degree, so a new degree id starts a new major.
    let mut majors: Vec<Value> = Vec::new();
    let mut current_degree: Option<String> = None;
    for row in rows {
        let semester = json!({
            "semesterId": row.semester_id,
            "semesterName": row.semester_name,
            "batchId": row.batch_id,
            "courses": batch_courses(conn, &row.batch_id)?
        });
        if current_degree.as_deref() != Some(row.degree_id.as_str()) {
            current_degree = Some(row.degree_id.clone());
            majors.push(json!({
                "degreeId": row.degree_id,
                "degreeName": row.degree_name,
                "semesters": []
            }));
        }
        if let Some(list) = majors
            .last_mut()
            .and_then(|m| m.get_mut("semesters"))
            .and_then(|s| s.as_array_mut())
        {
            list.push(semester);
        }
    }

    Ok(json!({
        "termId": term_id,
        "termName": term_name,
        "majors": majors
    }))
}

fn batch_instructors_update(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    require_row(conn, "batch_instructors", &batch_instructor_id, "batch instructor")?;
    let instructor_id = get_optional_str(params, "instructorId")?;
    if let Some(i) = instructor_id.as_deref() {
        require_row(conn, "instructors", i, "instructor")?;
    }
    let rooms = json!({
        "room1": get_optional_str(params, "classroom1")?,
        "times1": get_optional_str(params, "classTime1")?,
        "room2": get_optional_str(params, "classroom2")?,
        "times2": get_optional_str(params, "classTime2")?
    });
    conn.execute(
        "UPDATE batch_instructors SET instructor_id = ?, room_json = ? WHERE id = ?",
        (&instructor_id, rooms.to_string(), &batch_instructor_id),
    )
    .map_err(|e| {
        HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "batch_instructors" }))
    })?;
    Ok(json!({ "success": true, "instructorId": instructor_id, "rooms": rooms }))
}

fn batches_delete_for_degree(conn: &Connection, params: &Value) -> HandlerResult {
    let term_id = get_required_str(params, "termId")?;
    let degree_id = get_required_str(params, "degreeId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let bi_scope = format!(
        "SELECT id FROM batch_instructors WHERE batch_id IN ({})",
        BATCHES_OF_DEGREE
    );
    // Dependency order; the schema carries no ON DELETE CASCADE.
    let steps: Vec<(&str, String)> = vec![
        (
            "assessment_results",
            format!(
                "DELETE FROM assessment_results WHERE assessment_id IN (
                   SELECT a.id FROM assessments a
                   JOIN assessment_schemes s ON s.id = a.scheme_id
                   WHERE s.batch_instructor_id IN ({}))",
                bi_scope
            ),
        ),
        (
            "assessments",
            format!(
                "DELETE FROM assessments WHERE scheme_id IN (
                   SELECT id FROM assessment_schemes WHERE batch_instructor_id IN ({}))",
                bi_scope
            ),
        ),
        (
            "assessment_schemes",
            format!(
                "DELETE FROM assessment_schemes WHERE batch_instructor_id IN ({})",
                bi_scope
            ),
        ),
        (
            "video_conferences",
            format!(
                "DELETE FROM video_conferences WHERE batch_instructor_id IN ({})",
                bi_scope
            ),
        ),
        (
            "enrollment_courses",
            format!(
                "DELETE FROM enrollment_courses
                 WHERE batch_instructor_id IN ({bi})
                    OR enrollment_id IN (SELECT id FROM enrollments WHERE batch_id IN ({b}))",
                bi = bi_scope,
                b = BATCHES_OF_DEGREE
            ),
        ),
        (
            "enrollments",
            format!(
                "DELETE FROM enrollments WHERE batch_id IN ({})",
                BATCHES_OF_DEGREE
            ),
        ),
        (
            "batch_instructors",
            format!(
                "DELETE FROM batch_instructors WHERE batch_id IN ({})",
                BATCHES_OF_DEGREE
            ),
        ),
        (
            "batches",
            format!("DELETE FROM batches WHERE id IN ({})", BATCHES_OF_DEGREE),
        ),
    ];

    let mut deleted = serde_json::Map::new();
    for (table, sql) in steps {
        let n = tx.execute(&sql, (&term_id, &degree_id)).map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table }))
        })?;
        deleted.insert(table.to_string(), json!(n));
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "success": true, "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "batches.overview" => batches_overview,
        "batches.edit" => batches_edit,
        "batches.list" => batches_list,
        "batchInstructors.update" => batch_instructors_update,
        "batches.deleteForDegree" => batches_delete_for_degree,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
