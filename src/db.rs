use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "registrar.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS degrees(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            degree_id TEXT NOT NULL,
            name TEXT NOT NULL,
            syllabus_json TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY(degree_id) REFERENCES degrees(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_semesters_degree ON semesters(degree_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            credits REAL NOT NULL DEFAULT 0,
            hours REAL NOT NULL DEFAULT 0,
            department_id TEXT,
            marking_scheme_json TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS emergency_contacts(
            id TEXT PRIMARY KEY,
            contact_name TEXT,
            email TEXT,
            phone TEXT,
            relation TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            city TEXT,
            gender TEXT,
            date_of_birth TEXT,
            telegram_username TEXT,
            outlook_email TEXT,
            emergency_contact_id TEXT,
            FOREIGN KEY(emergency_contact_id) REFERENCES emergency_contacts(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS instructors(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            department_id TEXT,
            degree TEXT,
            specialization TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            roll_no TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id TEXT PRIMARY KEY,
            term_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            name TEXT NOT NULL,
            UNIQUE(term_id, semester_id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS batch_instructors(
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            instructor_id TEXT,
            room_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(instructor_id) REFERENCES instructors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batch_instructors_batch ON batch_instructors(batch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_schemes(
            id TEXT PRIMARY KEY,
            batch_instructor_id TEXT NOT NULL UNIQUE,
            scheme_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY(batch_instructor_id) REFERENCES batch_instructors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            scheme_id TEXT NOT NULL,
            assessment_type TEXT NOT NULL,
            title TEXT NOT NULL,
            total_mark REAL NOT NULL DEFAULT 0,
            due_date TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(scheme_id) REFERENCES assessment_schemes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_scheme ON assessments(scheme_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_results(
            id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            mark REAL NOT NULL DEFAULT 0,
            answer_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(assessment_id, student_id),
            FOREIGN KEY(assessment_id) REFERENCES assessments(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_results_student ON assessment_results(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sis_forms(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            form_json TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            sis_form_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            selected_json TEXT NOT NULL DEFAULT '{}',
            result_json TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            FOREIGN KEY(sis_form_id) REFERENCES sis_forms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_sis_form ON enrollments(sis_form_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollment_courses(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            batch_instructor_id TEXT NOT NULL,
            UNIQUE(enrollment_id, batch_instructor_id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(batch_instructor_id) REFERENCES batch_instructors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollment_courses_bi ON enrollment_courses(batch_instructor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS video_conferences(
            id TEXT PRIMARY KEY,
            batch_instructor_id TEXT NOT NULL,
            meeting_name TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(batch_instructor_id) REFERENCES batch_instructors(id)
        )",
        [],
    )?;
    // Room codes arrived after the first conference schema shipped.
    ensure_video_conferences_meeting_code(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_video_conferences_bi ON video_conferences(batch_instructor_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_video_conferences_meeting_code(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "video_conferences", "meeting_code")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE video_conferences ADD COLUMN meeting_code TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
