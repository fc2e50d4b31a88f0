use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    AnswerLog, CategoryId, CategoryResultKey, CenterId, Course, CourseId, Exam, ExamCategoryConfig,
    ExamCategoryResult, ExamEnrollment, ExamId, ExamStatus, QuestionDefinition, Student, StudentId,
};

/// Uniqueness scope an identifier is allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierScope {
    /// Registration numbers are unique per center; `None` is the center-less pool.
    RegistrationNumber { center_id: Option<CenterId> },
    /// Exam access ids are unique across every enrollment.
    ExamAccessId,
}

impl IdentifierScope {
    /// Storage constraint whose violation means a candidate from this scope collided.
    pub const fn constraint(self) -> UniqueConstraint {
        match self {
            IdentifierScope::RegistrationNumber { .. } => UniqueConstraint::RegistrationNumber,
            IdentifierScope::ExamAccessId => UniqueConstraint::AccessId,
        }
    }
}

impl fmt::Display for IdentifierScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierScope::RegistrationNumber {
                center_id: Some(center),
            } => write!(f, "registration numbers for center {center}"),
            IdentifierScope::RegistrationNumber { center_id: None } => {
                f.write_str("registration numbers")
            }
            IdentifierScope::ExamAccessId => f.write_str("exam access ids"),
        }
    }
}

/// Storage-level uniqueness constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueConstraint {
    RegistrationNumber,
    AccessId,
    Enrollment,
    CategoryResult,
}

impl fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UniqueConstraint::RegistrationNumber => "registration_number",
            UniqueConstraint::AccessId => "access_id",
            UniqueConstraint::Enrollment => "exam_student",
            UniqueConstraint::CategoryResult => "exam_student_category",
        };
        f.write_str(label)
    }
}

/// Storage abstraction replacing lazy ORM relations with explicit typed queries.
pub trait ExamRepository: Send + Sync {
    fn fetch_exam(&self, id: &ExamId) -> Result<Option<Exam>, RepositoryError>;
    fn update_exam(&self, exam: &Exam) -> Result<(), RepositoryError>;
    /// Exams in `status` whose scheduled end precedes `before`.
    fn exams_ended_before(
        &self,
        status: ExamStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Exam>, RepositoryError>;
    fn fetch_course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError>;

    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError>;
    /// Assigns the student id; fails with `Conflict(RegistrationNumber)` on a duplicate.
    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError>;

    fn identifier_exists(
        &self,
        scope: &IdentifierScope,
        value: &str,
    ) -> Result<bool, RepositoryError>;
    fn highest_identifier(&self, scope: &IdentifierScope)
        -> Result<Option<String>, RepositoryError>;

    fn fetch_enrollment(
        &self,
        exam_id: &ExamId,
        student_id: &StudentId,
    ) -> Result<Option<ExamEnrollment>, RepositoryError>;
    fn enrollments_for_exam(&self, exam_id: &ExamId)
        -> Result<Vec<ExamEnrollment>, RepositoryError>;
    /// Fails with `Conflict(Enrollment)` or `Conflict(AccessId)`.
    fn insert_enrollment(&self, enrollment: ExamEnrollment)
        -> Result<ExamEnrollment, RepositoryError>;
    fn category_config(
        &self,
        exam_id: &ExamId,
        category_id: &CategoryId,
    ) -> Result<Option<ExamCategoryConfig>, RepositoryError>;
    fn questions_for_category(
        &self,
        exam_id: &ExamId,
        category_id: &CategoryId,
    ) -> Result<Vec<QuestionDefinition>, RepositoryError>;

    fn fetch_result(
        &self,
        key: &CategoryResultKey,
    ) -> Result<Option<ExamCategoryResult>, RepositoryError>;
    fn results_for_exam(&self, exam_id: &ExamId)
        -> Result<Vec<ExamCategoryResult>, RepositoryError>;
    /// Append-only insert; fails with `Conflict(CategoryResult)` when the row exists.
    ///
    /// Result writes also store the row's `raw_answer_log` as the enrollment's answers for that
    /// category, in the same write.
    fn insert_result(&self, result: ExamCategoryResult)
        -> Result<ExamCategoryResult, RepositoryError>;
    /// Writes `result` when the stored version equals `expected_version`, returning the row
    /// with its version bumped.
    fn update_result(
        &self,
        result: ExamCategoryResult,
        expected_version: u64,
    ) -> Result<ExamCategoryResult, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("unique constraint violated: {0}")]
    Conflict(UniqueConstraint),
    #[error("stale write: expected version {expected}, found {found}")]
    StaleVersion { expected: u64, found: u64 },
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Structured audit sink for status transitions, declarations, and sweep runs.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;

    /// Record an entry for a write that has already committed. A transport failure is logged
    /// and returned as `false`; the committed change stands either way.
    fn record_committed(&self, entry: AuditEntry) -> bool {
        let event = entry.event.clone();
        let subject = entry.subject.clone();
        match self.record(entry) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(%event, %subject, error = %err, "audit entry lost after commit");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: String,
    pub subject: String,
    pub details: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(event: &str, subject: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            event: event.to_string(),
            subject: subject.into(),
            details: BTreeMap::new(),
            recorded_at,
        }
    }

    pub fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit transport unavailable: {0}")]
    Transport(String),
}

/// Audit sink that forwards entries to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            event = %entry.event,
            subject = %entry.subject,
            details = ?entry.details,
            recorded_at = %entry.recorded_at,
            "audit"
        );
        Ok(())
    }
}
