mod support;

use serde_json::json;
use support::{temp_dir, Sidecar};

#[test]
fn defaults_are_reported_for_a_fresh_workspace() {
    let workspace = temp_dir("registrar-setup-defaults");
    let mut s = Sidecar::with_workspace(&workspace);

    let setup = s.ok("setup.get", json!({}));
    assert_eq!(setup["enrollment"]["firstSemesterName"], json!("Semester 1"));
    assert_eq!(setup["enrollment"]["requireSisForm"], json!(true));
    assert_eq!(
        setup["assessments"]["seedResultTypes"],
        json!(["Class Participation", "Final (On Paper)", "Midterm", "Tutorial"])
    );
    assert_eq!(setup["assessments"]["defaultTotalMark"], json!(100));
    assert_eq!(setup["conference"]["earlyJoinMinutes"], json!(0));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn updates_are_validated_and_persist_across_restarts() {
    let workspace = temp_dir("registrar-setup-update");
    {
        let mut s = Sidecar::with_workspace(&workspace);
        let updated = s.ok(
            "setup.update",
            json!({ "section": "conference", "patch": { "earlyJoinMinutes": 15 } }),
        );
        assert_eq!(updated["conference"]["earlyJoinMinutes"], json!(15));

        assert_eq!(
            s.err_code(
                "setup.update",
                json!({ "section": "conference", "patch": { "earlyJoinMinutes": 61 } })
            ),
            "bad_params"
        );
        assert_eq!(
            s.err_code(
                "setup.update",
                json!({ "section": "grading", "patch": {} })
            ),
            "bad_params"
        );
        assert_eq!(
            s.err_code(
                "setup.update",
                json!({ "section": "assessments", "patch": { "seedResultTypes": ["Homework"] } })
            ),
            "bad_params"
        );
        s.ok(
            "setup.update",
            json!({ "section": "enrollment", "patch": { "requireSisForm": false } }),
        );
    }

    let mut s = Sidecar::with_workspace(&workspace);
    let setup = s.ok("setup.get", json!({}));
    assert_eq!(setup["conference"]["earlyJoinMinutes"], json!(15));
    assert_eq!(setup["enrollment"]["requireSisForm"], json!(false));
    assert_eq!(setup["enrollment"]["firstSemesterName"], json!("Semester 1"));

    let _ = std::fs::remove_dir_all(workspace);
}
