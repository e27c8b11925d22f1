use serde::Serialize;
use std::collections::BTreeMap;

/// Categories scored through the final exam path. They never take part in the
/// continuous assessment breakdown.
pub const RESERVED_CATEGORIES: [&str; 2] = ["Final", "Final (On Paper)"];

/// A course grade score strictly below this counts as a failed course.
pub const FAIL_GRADE_SCORE: f64 = 2.0;

/// Failure count at which a student is held back instead of progressing.
pub const BLOCKING_FAILURE_COUNT: usize = 3;

/// Reserved names are matched ignoring whitespace; older schemes were saved
/// with `Final(On Paper)`.
pub fn is_reserved_category(name: &str) -> bool {
    let squashed: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    RESERVED_CATEGORIES.iter().any(|r| {
        let r: String = r.chars().filter(|c| !c.is_whitespace()).collect();
        r == squashed
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentType {
    Quiz,
    Assignment,
    Tutorial,
    ClassParticipation,
    Midterm,
    Final,
    FinalOnPaper,
}

impl AssessmentType {
    pub const ALL: [AssessmentType; 7] = [
        AssessmentType::Quiz,
        AssessmentType::Assignment,
        AssessmentType::Tutorial,
        AssessmentType::ClassParticipation,
        AssessmentType::Midterm,
        AssessmentType::Final,
        AssessmentType::FinalOnPaper,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Quiz => "Quiz",
            Self::Assignment => "Assignment",
            Self::Tutorial => "Tutorial",
            Self::ClassParticipation => "Class Participation",
            Self::Midterm => "Midterm",
            Self::Final => "Final",
            Self::FinalOnPaper => "Final (On Paper)",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        let t = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.label().eq_ignore_ascii_case(t))
    }

    pub fn is_reserved(self) -> bool {
        is_reserved_category(self.label())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InvalidSchemeError {
    #[error("no assessment scheme is configured")]
    Missing,
    #[error("assessment scheme must be a JSON object")]
    NotAMapping,
    #[error("weight for `{category}` must be a number between 0 and 100")]
    BadWeight { category: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentRecord {
    pub category: String,
    pub raw_mark: f64,
    pub max_mark: f64,
}

impl AssessmentRecord {
    pub fn new(category: impl Into<String>, raw_mark: f64, max_mark: f64) -> Self {
        Self {
            category: category.into(),
            raw_mark,
            max_mark,
        }
    }

    fn is_well_formed(&self) -> bool {
        self.raw_mark.is_finite()
            && self.raw_mark >= 0.0
            && self.max_mark.is_finite()
            && self.max_mark >= 0.0
    }
}

/// Category name to weight percent, in the order the scheme was written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightScheme {
    entries: Vec<(String, f64)>,
}

fn parse_weight(v: &serde_json::Value) -> Option<f64> {
    let w = match v {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (w.is_finite() && (0.0..=100.0).contains(&w)).then_some(w)
}

impl WeightScheme {
    pub fn from_json(raw: Option<&serde_json::Value>) -> Result<Self, InvalidSchemeError> {
        let Some(raw) = raw else {
            return Err(InvalidSchemeError::Missing);
        };
        if raw.is_null() {
            return Err(InvalidSchemeError::Missing);
        }
        let Some(obj) = raw.as_object() else {
            return Err(InvalidSchemeError::NotAMapping);
        };
        let mut entries = Vec::with_capacity(obj.len());
        for (category, v) in obj {
            let Some(weight) = parse_weight(v) else {
                return Err(InvalidSchemeError::BadWeight {
                    category: category.clone(),
                });
            };
            entries.push((category.clone(), weight));
        }
        Ok(Self { entries })
    }

    #[cfg(test)]
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut scheme = Self::default();
        for (name, weight) in pairs {
            let name = name.into();
            match scheme.entries.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = weight,
                None => scheme.entries.push((name, weight)),
            }
        }
        scheme
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, w)| (n.as_str(), *w))
    }

    pub fn weight(&self, category: &str) -> Option<f64> {
        self.iter().find(|(n, _)| *n == category).map(|(_, w)| w)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub student_name: String,
    pub roll_no: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryResult {
    pub category: String,
    pub given_percent: f64,
    pub given_total: f64,
    pub got_marks: f64,
    pub got_percent: f64,
    pub count: usize,
}

impl CategoryResult {
    fn empty(category: &str, given_percent: f64) -> Self {
        Self {
            category: category.to_string(),
            given_percent,
            given_total: 0.0,
            got_marks: 0.0,
            got_percent: 0.0,
            count: 0,
        }
    }

    fn settle(&mut self) {
        self.got_percent = if self.given_total > 0.0 {
            self.got_marks * self.given_percent / self.given_total
        } else if self.count > 0 {
            // Entries exist but carry no possible marks: average the raw marks unscaled.
            self.got_marks / self.count as f64
        } else {
            self.got_marks
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseResult {
    #[serde(flatten)]
    pub student: StudentIdentity,
    pub assessment_results: BTreeMap<String, CategoryResult>,
}

impl CourseResult {
    #[cfg(test)]
    pub fn category(&self, name: &str) -> Option<&CategoryResult> {
        self.assessment_results.get(name)
    }

    /// Sum of the weighted category contributions.
    pub fn continuous_total(&self) -> f64 {
        self.assessment_results.values().map(|c| c.got_percent).sum()
    }
}

/// Weighted per-category breakdown for one student in one course offering.
///
/// A missing or malformed scheme is reported as [`InvalidSchemeError`]. A
/// malformed record yields `Ok(None)`: callers treat an absent result as a
/// normal outcome for that student.
pub fn compute_course_result(
    student: &StudentIdentity,
    records: &[AssessmentRecord],
    scheme: Option<&WeightScheme>,
) -> Result<Option<CourseResult>, InvalidSchemeError> {
    let Some(scheme) = scheme else {
        return Err(InvalidSchemeError::Missing);
    };

    let mut categories: BTreeMap<String, CategoryResult> = scheme
        .iter()
        .filter(|(name, _)| !is_reserved_category(name))
        .map(|(name, weight)| (name.to_string(), CategoryResult::empty(name, weight)))
        .collect();

    for r in records {
        let Some(c) = categories.get_mut(&r.category) else {
            continue;
        };
        if !r.is_well_formed() {
            tracing::warn!(
                student = %student.roll_no,
                category = %r.category,
                raw_mark = r.raw_mark,
                max_mark = r.max_mark,
                "malformed assessment record; course result left empty"
            );
            return Ok(None);
        }
        c.given_total += r.max_mark;
        c.got_marks += r.raw_mark;
        c.count += 1;
    }
    for c in categories.values_mut() {
        c.settle();
    }

    Ok(Some(CourseResult {
        student: student.clone(),
        assessment_results: categories,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureBucket {
    NoFailures,
    SomeFailures,
    Blocking,
}

impl FailureBucket {
    pub fn key(self) -> &'static str {
        match self {
            Self::NoFailures => "noFail",
            Self::SomeFailures => "lessThan3Fails",
            Self::Blocking => "moreThan3Fails",
        }
    }
}

pub fn is_failing_score(grade_score: f64) -> bool {
    grade_score < FAIL_GRADE_SCORE
}

pub fn count_failures<I>(grade_scores: I) -> usize
where
    I: IntoIterator<Item = f64>,
{
    grade_scores
        .into_iter()
        .filter(|s| is_failing_score(*s))
        .count()
}

pub fn categorize_by_failure_count<I>(grade_scores: I) -> FailureBucket
where
    I: IntoIterator<Item = f64>,
{
    match count_failures(grade_scores) {
        0 => FailureBucket::NoFailures,
        n if n < BLOCKING_FAILURE_COUNT => FailureBucket::SomeFailures,
        _ => FailureBucket::Blocking,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub letter_grade: &'static str,
    pub grade_score: f64,
}

const GRADE_BANDS: [(f64, &str, f64); 9] = [
    (90.0, "A+", 4.0),
    (80.0, "A", 4.0),
    (75.0, "A-", 3.7),
    (70.0, "B+", 3.3),
    (65.0, "B", 3.0),
    (60.0, "B-", 2.7),
    (55.0, "C+", 2.3),
    (50.0, "C", 2.0),
    (40.0, "D", 1.0),
];

/// Letter grade for a course total out of 100.
pub fn grade_for_total(total_marks: f64) -> GradeBand {
    let t = if total_marks.is_nan() {
        0.0
    } else {
        total_marks.clamp(0.0, 100.0)
    };
    for (min, letter, score) in GRADE_BANDS {
        if t >= min {
            return GradeBand {
                letter_grade: letter,
                grade_score: score,
            };
        }
    }
    GradeBand {
        letter_grade: "F",
        grade_score: 0.0,
    }
}

pub fn round_off_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Credit-weighted mean of grade scores; `None` when no credits were taken.
pub fn term_gpa<I>(courses: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut points = 0.0;
    let mut credits = 0.0;
    for (course_credits, grade_score) in courses {
        points += grade_score * course_credits;
        credits += course_credits;
    }
    (credits > 0.0).then(|| points / credits)
}
