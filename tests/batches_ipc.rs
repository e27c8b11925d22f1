mod support;

use rusqlite::Connection;
use serde_json::json;
use support::{batch_for, offering_of, seed_catalog, str_field, temp_dir, Sidecar};

#[test]
fn batches_edit_creates_each_semester_batch_once() {
    let workspace = temp_dir("registrar-batches-edit");
    let mut s = Sidecar::with_workspace(&workspace);
    let cat = seed_catalog(&mut s, "2024-2025 Term 1");

    let overview = s.ok("batches.overview", json!({ "termId": cat.term_id }));
    assert_eq!(overview["termName"], json!("2024-2025 Term 1"));
    assert_eq!(overview["semesters"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(overview["allInstructors"].as_array().map(|a| a.len()), Some(1));

    let first = s.ok(
        "batches.edit",
        json!({ "termId": cat.term_id, "semesterIds": [cat.semester1_id, cat.semester2_id] }),
    );
    assert_eq!(first["createdBatches"], json!(2));
    assert_eq!(first["createdInstructors"], json!(6));

    let again = s.ok(
        "batches.edit",
        json!({ "termId": cat.term_id, "semesterIds": [cat.semester1_id] }),
    );
    assert_eq!(again["createdBatches"], json!(0));
    assert_eq!(again["createdInstructors"], json!(0));

    assert_eq!(
        s.err_code(
            "batches.edit",
            json!({ "termId": cat.term_id, "semesterIds": ["nope"] })
        ),
        "not_found"
    );

    let listed = s.ok("batches.list", json!({ "termId": cat.term_id }));
    let majors = listed["majors"].as_array().expect("majors");
    assert_eq!(majors.len(), 1);
    assert_eq!(majors[0]["degreeName"], json!("Computer Science"));
    let sem1 = batch_for(&mut s, &cat.term_id, &cat.semester1_id);
    assert_eq!(sem1["semesterName"], json!("Semester 1"));
    let codes: Vec<&str> = sem1["courses"]
        .as_array()
        .expect("courses")
        .iter()
        .filter_map(|c| c["courseCode"].as_str())
        .collect();
    assert_eq!(codes, vec!["CS101", "CS102", "CS103", "CS104"]);

    let conn = Connection::open(workspace.join("registrar.sqlite3")).expect("open db");
    let name: String = conn
        .query_row(
            "SELECT name FROM batches WHERE id = ?",
            [str_field(&sem1, "batchId")],
            |r| r.get(0),
        )
        .expect("batch row");
    assert_eq!(name, "2024-2025 Term 1 Semester 1");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn batch_instructor_assignment_and_rooms() {
    let workspace = temp_dir("registrar-batches-assign");
    let mut s = Sidecar::with_workspace(&workspace);
    let cat = seed_catalog(&mut s, "Term A");
    s.ok(
        "batches.edit",
        json!({ "termId": cat.term_id, "semesterIds": [cat.semester1_id] }),
    );
    let sem1 = batch_for(&mut s, &cat.term_id, &cat.semester1_id);
    let bi = offering_of(&sem1, "CS101");

    s.ok(
        "batchInstructors.update",
        json!({
            "batchInstructorId": bi,
            "instructorId": cat.instructor_id,
            "classroom1": "R-201",
            "classTime1": "Mon 09:00",
            "classroom2": "Lab 3",
            "classTime2": "Thu 13:00"
        }),
    );
    assert_eq!(
        s.err_code(
            "batchInstructors.update",
            json!({ "batchInstructorId": bi, "instructorId": "ghost" })
        ),
        "not_found"
    );

    let sem1 = batch_for(&mut s, &cat.term_id, &cat.semester1_id);
    let course = sem1["courses"]
        .as_array()
        .expect("courses")
        .iter()
        .find(|c| c["courseCode"] == json!("CS101"))
        .cloned()
        .expect("CS101");
    assert_eq!(course["instructor"]["name"], json!("Daw Khin"));
    assert_eq!(
        course["rooms"],
        json!({ "room1": "R-201", "times1": "Mon 09:00", "room2": "Lab 3", "times2": "Thu 13:00" })
    );
    let other = offering_of(&sem1, "CS102");
    let cs102 = sem1["courses"]
        .as_array()
        .expect("courses")
        .iter()
        .find(|c| c["batchInstructorId"] == json!(other))
        .cloned()
        .expect("CS102");
    assert!(cs102["instructor"].is_null());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_for_degree_removes_dependent_rows() {
    let workspace = temp_dir("registrar-batches-delete");
    let mut s = Sidecar::with_workspace(&workspace);
    let cat = seed_catalog(&mut s, "Term D");
    s.ok(
        "batches.edit",
        json!({ "termId": cat.term_id, "semesterIds": [cat.semester1_id, cat.semester2_id] }),
    );
    let sem1 = batch_for(&mut s, &cat.term_id, &cat.semester1_id);
    let bi = offering_of(&sem1, "CS101");
    s.ok("schemes.get", json!({ "batchInstructorId": bi }));
    s.ok(
        "assessments.create",
        json!({ "batchInstructorId": bi, "type": "Quiz" }),
    );
    s.ok(
        "conferences.create",
        json!({
            "batchInstructorId": bi,
            "meetingName": "Office hours",
            "startTime": "2024-05-01T09:00",
            "endTime": "2024-05-01T10:00"
        }),
    );

    let deleted = s.ok(
        "batches.deleteForDegree",
        json!({ "termId": cat.term_id, "degreeId": cat.degree_id }),
    );
    assert_eq!(deleted["deleted"]["batches"], json!(2));
    assert_eq!(deleted["deleted"]["batch_instructors"], json!(6));
    assert_eq!(deleted["deleted"]["assessments"], json!(1));
    assert_eq!(deleted["deleted"]["video_conferences"], json!(1));

    let listed = s.ok("batches.list", json!({ "termId": cat.term_id }));
    assert_eq!(listed["majors"], json!([]));

    let conn = Connection::open(workspace.join("registrar.sqlite3")).expect("open db");
    let schemes: i64 = conn
        .query_row("SELECT COUNT(*) FROM assessment_schemes", [], |r| r.get(0))
        .expect("count schemes");
    assert_eq!(schemes, 0);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn semesters_sort_by_number_not_text() {
    let workspace = temp_dir("registrar-batches-order");
    let mut s = Sidecar::with_workspace(&workspace);
    let cat = seed_catalog(&mut s, "Term N");
    let sem10 = s.ok(
        "semesters.create",
        json!({
            "degreeId": cat.degree_id,
            "name": "Semester 10",
            "syllabus": [{ "courseCode": "CS201" }]
        }),
    );
    let sem10_id = str_field(&sem10, "semesterId");
    s.ok(
        "batches.edit",
        json!({
            "termId": cat.term_id,
            "semesterIds": [sem10_id, cat.semester2_id, cat.semester1_id]
        }),
    );

    let listed = s.ok("batches.list", json!({ "termId": cat.term_id }));
    let names: Vec<&str> = listed["majors"][0]["semesters"]
        .as_array()
        .expect("semesters")
        .iter()
        .filter_map(|sem| sem["semesterName"].as_str())
        .collect();
    assert_eq!(names, vec!["Semester 1", "Semester 2", "Semester 10"]);

    let semesters = s.ok("semesters.list", json!({ "degreeId": cat.degree_id }));
    let names: Vec<&str> = semesters["semesters"]
        .as_array()
        .expect("semesters")
        .iter()
        .filter_map(|sem| sem["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Semester 1", "Semester 2", "Semester 10"]);

    let _ = std::fs::remove_dir_all(workspace);
}
