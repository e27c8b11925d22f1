use crate::calc::{
    compute_course_result, is_reserved_category, AssessmentRecord, CourseResult,
    InvalidSchemeError, StudentIdentity, WeightScheme,
};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};

/// Everything the grade aggregator needs for one (student, course offering)
/// pair. Lookups that find nothing return `Ok(None)` / empty vectors.
pub trait ResultSource {
    fn scheme_for(&self, batch_instructor_id: &str) -> anyhow::Result<Option<serde_json::Value>>;

    /// Results of the non-final assessments of this offering for one student.
    fn records_for(
        &self,
        batch_instructor_id: &str,
        student_id: &str,
    ) -> anyhow::Result<Vec<AssessmentRecord>>;

    fn student_identity(&self, student_id: &str) -> anyhow::Result<Option<StudentIdentity>>;
}

pub struct SqliteResultSource<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteResultSource<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ResultSource for SqliteResultSource<'_> {
    fn scheme_for(&self, batch_instructor_id: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT scheme_json FROM assessment_schemes WHERE batch_instructor_id = ?",
                [batch_instructor_id],
                |r| r.get(0),
            )
            .optional()
            .context("failed to load assessment scheme")?;
        match raw {
            Some(text) => Ok(Some(
                serde_json::from_str(&text).context("stored scheme is invalid JSON")?,
            )),
            None => Ok(None),
        }
    }

    fn records_for(
        &self,
        batch_instructor_id: &str,
        student_id: &str,
    ) -> anyhow::Result<Vec<AssessmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.assessment_type, ar.mark, a.total_mark
             FROM assessment_results ar
             JOIN assessments a ON a.id = ar.assessment_id
             JOIN assessment_schemes s ON s.id = a.scheme_id
             WHERE s.batch_instructor_id = ? AND ar.student_id = ?
             ORDER BY a.created_at, a.rowid",
        )?;
        let rows = stmt
            .query_map((batch_instructor_id, student_id), |r| {
                Ok(AssessmentRecord::new(
                    r.get::<_, String>(0)?,
                    r.get(1)?,
                    r.get(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter(|r| !is_reserved_category(&r.category))
            .collect())
    }

    fn student_identity(&self, student_id: &str) -> anyhow::Result<Option<StudentIdentity>> {
        let row = self
            .conn
            .query_row(
                "SELECT u.full_name, s.roll_no
                 FROM students s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.id = ?",
                [student_id],
                |r| {
                    Ok(StudentIdentity {
                        student_name: r.get(0)?,
                        roll_no: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CourseResultOutcome {
    Computed(CourseResult),
    NoScheme(InvalidSchemeError),
    /// Nothing to report for this pair; not an error for the caller.
    Empty,
}

pub fn course_result_for(
    source: &dyn ResultSource,
    batch_instructor_id: &str,
    student_id: &str,
) -> CourseResultOutcome {
    let loaded = (|| -> anyhow::Result<_> {
        let student = source.student_identity(student_id)?;
        let scheme = source.scheme_for(batch_instructor_id)?;
        let records = source.records_for(batch_instructor_id, student_id)?;
        Ok((student, scheme, records))
    })();
    let (student, scheme, records) = match loaded {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                batch_instructor_id,
                student_id,
                error = %format!("{e:#}"),
                "course result lookup failed; reporting empty"
            );
            return CourseResultOutcome::Empty;
        }
    };
    let Some(student) = student else {
        return CourseResultOutcome::Empty;
    };

    let scheme = match WeightScheme::from_json(scheme.as_ref()) {
        Ok(s) => s,
        Err(e) => return CourseResultOutcome::NoScheme(e),
    };
    match compute_course_result(&student, &records, Some(&scheme)) {
        Ok(Some(result)) => CourseResultOutcome::Computed(result),
        Ok(None) => CourseResultOutcome::Empty,
        Err(e) => CourseResultOutcome::NoScheme(e),
    }
}
