mod support;

use serde_json::json;
use support::{create_student, temp_dir, Sidecar};

#[test]
fn sis_form_is_saved_once_then_updated() {
    let workspace = temp_dir("registrar-sis");
    let mut s = Sidecar::with_workspace(&workspace);
    let student = create_student(&mut s, "Nandar", "nandar@example.edu", "CS-040");
    create_student(&mut s, "Taken", "taken@example.edu", "CS-041");

    let empty = s.ok("sis.get", json!({ "studentId": student }));
    assert!(empty["form"].is_null());
    let profile = s.ok("profile.get", json!({ "studentId": student }));
    assert_eq!(profile["hasSisForm"], json!(false));
    assert_eq!(profile["form"]["hasSpouse"], json!(false));

    assert_eq!(
        s.err_code(
            "sis.update",
            json!({ "studentId": student, "form": {} })
        ),
        "not_found"
    );
    assert_eq!(
        s.err_code(
            "sis.save",
            json!({ "studentId": student, "form": { "favouriteColour": "blue" } })
        ),
        "bad_params"
    );
    assert_eq!(
        s.err_code("sis.save", json!({ "studentId": "nobody", "form": {} })),
        "not_found"
    );

    s.ok(
        "sis.save",
        json!({
            "studentId": student,
            "contact": { "city": "Mandalay", "phone": "09-333" },
            "emergencyContact": { "name": "Daw Mya", "phone": "09-444", "relation": "Mother" },
            "form": {
                "bloodGroup": "B",
                "nrc": "9/MaHaMa(N)123456",
                "mother": { "name": "Daw Mya", "profession": "Nurse" },
                "matriculation": { "rollNo": "M-77", "passedYear": "2022" },
                "hasSpouse": false,
                "spouseName": "should be dropped"
            }
        }),
    );
    assert_eq!(
        s.err_code("sis.save", json!({ "studentId": student, "form": {} })),
        "conflict"
    );

    let saved = s.ok("sis.get", json!({ "studentId": student }));
    assert_eq!(saved["form"]["bloodGroup"], json!("B"));
    assert_eq!(saved["form"]["mother"]["profession"], json!("Nurse"));
    assert!(saved["form"]["spouseName"].is_null());
    assert_eq!(saved["student"]["city"], json!("Mandalay"));
    assert_eq!(saved["student"]["emergencyContact"]["relation"], json!("Mother"));

    assert_eq!(
        s.err_code(
            "sis.update",
            json!({ "studentId": student, "contact": { "email": "taken@example.edu" }, "form": {} })
        ),
        "conflict"
    );
    s.ok(
        "sis.update",
        json!({
            "studentId": student,
            "contact": { "email": "Nandar.New@example.edu" },
            "emergencyContact": { "name": "U Hla", "relation": "Uncle" },
            "form": { "bloodGroup": "AB", "hasSpouse": true, "spouseName": "Ko Min" }
        }),
    );

    let profile = s.ok("profile.get", json!({ "studentId": student }));
    assert_eq!(profile["hasSisForm"], json!(true));
    assert_eq!(profile["form"]["bloodGroup"], json!("AB"));
    assert_eq!(profile["form"]["spouseName"], json!("Ko Min"));
    assert_eq!(profile["student"]["email"], json!("nandar.new@example.edu"));
    assert_eq!(profile["student"]["city"], json!("Mandalay"));
    assert_eq!(profile["student"]["emergencyContact"]["name"], json!("U Hla"));

    let _ = std::fs::remove_dir_all(workspace);
}
