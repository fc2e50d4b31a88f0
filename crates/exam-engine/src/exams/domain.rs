use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Primary key of a scheduled exam.
    ExamId
);
numeric_id!(StudentId);
numeric_id!(CourseId);
numeric_id!(CenterId);
numeric_id!(
    /// Topic grouping of questions inside an exam.
    CategoryId
);

/// Stable key of a question within a category (e.g. `"q-07"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuestionKey(pub String);

/// Key of an answer option (e.g. `"B"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OptionKey(pub String);

/// Opaque identity of the administrator recording a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(pub String);

/// Sparse map of question to selected option; an absent key means unanswered.
pub type AnswerLog = BTreeMap<QuestionKey, OptionKey>;

/// Answer logs of one enrollment, one per submitted category. Question keys are only unique
/// within a category.
pub type CategoryAnswers = BTreeMap<CategoryId, AnswerLog>;

/// Lifecycle status of an exam. Only `Scheduled` (at creation) and an administrator-issued
/// `Cancelled` are written directly; every other transition goes through the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    Scheduled,
    Completed,
    PartialCompleted,
    Cancelled,
}

impl ExamStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ExamStatus::Scheduled => "scheduled",
            ExamStatus::Completed => "completed",
            ExamStatus::PartialCompleted => "partial_completed",
            ExamStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exam {
    pub id: ExamId,
    pub external_id: String,
    pub course_id: CourseId,
    pub center_id: Option<CenterId>,
    pub scheduled_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: ExamStatus,
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl Exam {
    /// End of the exam window. Schedules are recorded in UTC.
    pub fn ends_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.scheduled_date.and_time(self.end_time))
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.ends_at() < now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub center_id: Option<CenterId>,
    pub registration_number: String,
    pub name: String,
}

/// A student's registration for one exam. Access credentials are fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamEnrollment {
    pub exam_id: ExamId,
    pub student_id: StudentId,
    pub access_id: String,
    pub access_secret: String,
    #[serde(default)]
    pub raw_answers: CategoryAnswers,
    pub enrolled_at: DateTime<Utc>,
}

impl ExamEnrollment {
    pub fn answers_for(&self, category_id: &CategoryId) -> Option<&AnswerLog> {
        self.raw_answers.get(category_id)
    }
}

/// Administrator-recorded outcome for a category attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredResult {
    Passed,
    Failed,
}

impl DeclaredResult {
    pub const fn label(self) -> &'static str {
        match self {
            DeclaredResult::Passed => "passed",
            DeclaredResult::Failed => "failed",
        }
    }

    pub const fn from_passed(passed: bool) -> Self {
        if passed {
            DeclaredResult::Passed
        } else {
            DeclaredResult::Failed
        }
    }
}

impl fmt::Display for DeclaredResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamCategoryConfig {
    pub exam_id: ExamId,
    pub category_id: CategoryId,
    pub total_points: u32,
    pub passing_points: u32,
}

impl ExamCategoryConfig {
    pub fn is_passing(&self, points_earned: u32) -> bool {
        points_earned >= self.passing_points
    }
}

/// Question definition as configured for a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    pub key: QuestionKey,
    pub correct_option: OptionKey,
    pub points: u32,
    #[serde(default)]
    pub options: Vec<OptionKey>,
}

/// Composite key of a category result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryResultKey {
    pub exam_id: ExamId,
    pub student_id: StudentId,
    pub category_id: CategoryId,
}

impl fmt::Display for CategoryResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exam {} / student {} / category {}",
            self.exam_id, self.student_id, self.category_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Correct,
    Incorrect,
    Skipped,
}

/// Per-question line of a category result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub key: QuestionKey,
    pub selected: Option<OptionKey>,
    pub full_points: u32,
    pub earned_points: u32,
    pub outcome: AnswerOutcome,
}

/// One row per exam x student x category. Rows are appended on submission and only change
/// through an explicit declaration, correction, or answer edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamCategoryResult {
    pub exam_id: ExamId,
    pub student_id: StudentId,
    pub category_id: CategoryId,
    pub total_questions: u32,
    pub answered_questions: u32,
    pub skipped_questions: u32,
    pub total_points: u32,
    pub points_earned: u32,
    pub percentage: f64,
    pub declared_result: Option<DeclaredResult>,
    pub declared_by: Option<Principal>,
    pub declared_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub raw_answer_log: AnswerLog,
    pub question_scores: Vec<QuestionScore>,
    /// Optimistic-lock counter, bumped by every successful write.
    pub version: u64,
}

impl ExamCategoryResult {
    pub fn key(&self) -> CategoryResultKey {
        CategoryResultKey {
            exam_id: self.exam_id,
            student_id: self.student_id,
            category_id: self.category_id,
        }
    }

    pub fn is_declared(&self) -> bool {
        self.declared_result.is_some()
    }
}

/// Computed pass/fail disagreeing with the stored declaration. Reported as data for an
/// administrator to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityAnomaly {
    pub key: CategoryResultKey,
    pub computed: DeclaredResult,
    pub declared: DeclaredResult,
    pub points_earned: u32,
    pub passing_points: u32,
}

impl IntegrityAnomaly {
    pub fn summary(&self) -> String {
        format!(
            "{}: computed {} ({} of {} passing points) but declared {}",
            self.key, self.computed, self.points_earned, self.passing_points, self.declared
        )
    }
}
