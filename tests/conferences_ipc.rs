mod support;

use serde_json::json;
use support::{batch_for, offering_of, seed_catalog, str_field, temp_dir, Sidecar};

#[test]
fn conference_lifecycle_and_join_roles() {
    let workspace = temp_dir("registrar-conferences");
    let mut s = Sidecar::with_workspace(&workspace);
    let cat = seed_catalog(&mut s, "Term C");
    s.ok(
        "batches.edit",
        json!({ "termId": cat.term_id, "semesterIds": [cat.semester1_id] }),
    );
    let sem1 = batch_for(&mut s, &cat.term_id, &cat.semester1_id);
    let bi = offering_of(&sem1, "CS101");
    s.ok(
        "batchInstructors.update",
        json!({ "batchInstructorId": bi, "instructorId": cat.instructor_id }),
    );

    assert_eq!(
        s.err_code(
            "conferences.create",
            json!({
                "batchInstructorId": bi,
                "meetingName": "Backwards",
                "startTime": "2024-06-01T10:00",
                "endTime": "2024-06-01T09:00"
            })
        ),
        "bad_params"
    );
    assert_eq!(
        s.err_code(
            "conferences.create",
            json!({
                "batchInstructorId": bi,
                "meetingName": "Garbled",
                "startTime": "tomorrow",
                "endTime": "2024-06-01T09:00"
            })
        ),
        "bad_params"
    );

    let lecture = s.ok(
        "conferences.create",
        json!({
            "batchInstructorId": bi,
            "meetingName": "Lecture 1",
            "startTime": "2024-06-01T09:00",
            "endTime": "2024-06-01T10:30:00+00:00"
        }),
    );
    assert_eq!(lecture["startTime"], json!("2024-06-01T09:00:00Z"));
    let lecture_id = str_field(&lecture, "conferenceId");
    let review = s.ok(
        "conferences.create",
        json!({
            "batchInstructorId": bi,
            "meetingName": "Review",
            "startTime": "2024-06-08T09:00:00Z",
            "endTime": "2024-06-08T10:00:00Z"
        }),
    );
    let review_id = str_field(&review, "conferenceId");

    let listed = s.ok(
        "conferences.list",
        json!({ "batchInstructorId": bi, "now": "2024-06-01T09:15:00Z" }),
    );
    let items = listed["conferences"].as_array().expect("conferences");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["meetingName"], json!("Review"));
    assert_eq!(items[0]["canJoin"], json!(false));
    assert_eq!(items[1]["canJoin"], json!(true));

    let early = s.ok(
        "conferences.list",
        json!({ "batchInstructorId": bi, "now": "2024-06-01T08:50:00Z" }),
    );
    assert_eq!(early["conferences"][1]["canJoin"], json!(false));
    s.ok(
        "setup.update",
        json!({ "section": "conference", "patch": { "earlyJoinMinutes": 15 } }),
    );
    let early = s.ok(
        "course.overview",
        json!({ "batchInstructorId": bi, "now": "2024-06-01T08:50:00Z" }),
    );
    assert_eq!(early["conferences"][1]["canJoin"], json!(true));

    let denied = s.ok(
        "conferences.join",
        json!({ "conferenceId": lecture_id, "email": "student@example.edu" }),
    );
    assert_eq!(denied["role"], json!("denied"));
    let host = s.ok(
        "conferences.join",
        json!({ "conferenceId": lecture_id, "email": "DAW.KHIN@example.edu" }),
    );
    assert_eq!(host["role"], json!("host"));

    s.ok(
        "conferences.saveMeetingCode",
        json!({ "conferenceId": lecture_id, "meetingCode": "room-7f3a" }),
    );
    let participant = s.ok(
        "conferences.join",
        json!({ "conferenceId": lecture_id, "email": "student@example.edu" }),
    );
    assert_eq!(participant["role"], json!("participant"));
    assert_eq!(participant["roomId"], json!("room-7f3a"));

    s.ok("conferences.delete", json!({ "conferenceId": review_id }));
    assert_eq!(
        s.err_code("conferences.delete", json!({ "conferenceId": review_id })),
        "not_found"
    );
    let remaining = s.ok("conferences.list", json!({ "batchInstructorId": bi }));
    assert_eq!(remaining["conferences"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(remaining["conferences"][0]["meetingCode"], json!("room-7f3a"));

    let _ = std::fs::remove_dir_all(workspace);
}
