#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// A running daemon speaking JSON lines over stdin/stdout.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_registrard");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn registrard");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawns a daemon with `workspace` already selected.
    pub fn with_workspace(workspace: &PathBuf) -> Self {
        let mut s = Self::spawn();
        s.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        s
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Error code of a request that must fail.
    pub fn err_code(&mut self, method: &str, params: Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"]
            .as_str()
            .expect("error code")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

/// Ids of a small seeded catalog: one CS degree with two semesters.
pub struct Catalog {
    pub term_id: String,
    pub degree_id: String,
    pub semester1_id: String,
    pub semester2_id: String,
    pub instructor_id: String,
    pub instructor_email: String,
    pub course_ids: Vec<(String, String)>,
}

impl Catalog {
    pub fn course_id(&self, code: &str) -> String {
        self.course_ids
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, id)| id.clone())
            .unwrap_or_else(|| panic!("unknown course {}", code))
    }
}

pub fn seed_catalog(s: &mut Sidecar, term_name: &str) -> Catalog {
    let term = s.ok("terms.create", json!({ "name": term_name }));
    let degree = s.ok(
        "degrees.create",
        json!({ "name": "Computer Science", "code": "CS" }),
    );
    let degree_id = str_field(&degree, "degreeId");
    let dept = s.ok("departments.create", json!({ "name": "Computing" }));
    let dept_id = str_field(&dept, "departmentId");

    let mut course_ids = Vec::new();
    for (code, name, credits) in [
        ("CS101", "Programming I", 3.0),
        ("CS102", "Discrete Maths", 3.0),
        ("CS103", "Digital Logic", 2.0),
        ("CS104", "Technical Writing", 1.0),
        ("CS201", "Programming II", 3.0),
        ("CS202", "Data Structures", 3.0),
    ] {
        let c = s.ok(
            "courses.create",
            json!({
                "code": code,
                "name": name,
                "credits": credits,
                "hours": 45,
                "departmentId": dept_id,
                "markingScheme": { "Midterm": 30, "Final": 40, "Quiz": 30 }
            }),
        );
        course_ids.push((code.to_string(), str_field(&c, "courseId")));
    }

    let sem1 = s.ok(
        "semesters.create",
        json!({
            "degreeId": degree_id,
            "name": "Semester 1",
            "syllabus": [
                { "courseCode": "CS101", "type": "core" },
                { "courseCode": "CS102", "type": "core" },
                { "courseCode": "CS103", "type": "supportive" },
                { "courseCode": "CS104", "type": "elective" }
            ]
        }),
    );
    let sem2 = s.ok(
        "semesters.create",
        json!({
            "degreeId": degree_id,
            "name": "Semester 2",
            "syllabus": [
                { "courseCode": "CS201" },
                { "courseCode": "CS202" }
            ]
        }),
    );

    let instructor_email = "daw.khin@example.edu".to_string();
    let instructor = s.ok(
        "instructors.create",
        json!({
            "fullName": "Daw Khin",
            "email": instructor_email,
            "departmentId": dept_id,
            "degree": "PhD",
            "specialization": "Systems"
        }),
    );

    Catalog {
        term_id: str_field(&term, "termId"),
        degree_id,
        semester1_id: str_field(&sem1, "semesterId"),
        semester2_id: str_field(&sem2, "semesterId"),
        instructor_id: str_field(&instructor, "instructorId"),
        instructor_email,
        course_ids,
    }
}

pub fn create_student(s: &mut Sidecar, name: &str, email: &str, roll_no: &str) -> String {
    let st = s.ok(
        "students.create",
        json!({ "fullName": name, "email": email, "rollNo": roll_no, "phone": "09-111" }),
    );
    str_field(&st, "studentId")
}

pub fn submit_sis(s: &mut Sidecar, student_id: &str) {
    s.ok(
        "sis.save",
        json!({
            "studentId": student_id,
            "contact": { "city": "Yangon" },
            "emergencyContact": { "name": "U Ba", "phone": "09-222", "relation": "Father" },
            "form": { "bloodGroup": "A" }
        }),
    );
}

/// Batch id of `semester_id` in `term_id` from `batches.list`.
pub fn batch_for(s: &mut Sidecar, term_id: &str, semester_id: &str) -> Value {
    let listed = s.ok("batches.list", json!({ "termId": term_id }));
    listed["majors"]
        .as_array()
        .expect("majors")
        .iter()
        .flat_map(|m| m["semesters"].as_array().cloned().unwrap_or_default())
        .find(|sem| sem["semesterId"] == json!(semester_id))
        .unwrap_or_else(|| panic!("no batch for semester {}", semester_id))
}

/// Batch instructor id of `code` inside a `batches.list` semester entry.
pub fn offering_of(semester: &Value, code: &str) -> String {
    semester["courses"]
        .as_array()
        .expect("courses")
        .iter()
        .find(|c| c["courseCode"] == json!(code))
        .map(|c| str_field(c, "batchInstructorId"))
        .unwrap_or_else(|| panic!("no offering for {}", code))
}

/// Enrolls and approves `student_id` into a batch for the given course codes.
pub fn enroll_approved(
    s: &mut Sidecar,
    catalog: &Catalog,
    student_id: &str,
    batch_id: &str,
    codes: &[&str],
) -> String {
    let ids: Vec<String> = codes.iter().map(|c| catalog.course_id(c)).collect();
    let saved = s.ok(
        "enrollment.save",
        json!({ "studentId": student_id, "batchId": batch_id, "courseIds": ids }),
    );
    let enrollment_id = str_field(&saved, "enrollmentId");
    s.ok(
        "enrollment.setStatus",
        json!({ "enrollmentId": enrollment_id, "status": "approved" }),
    );
    enrollment_id
}
