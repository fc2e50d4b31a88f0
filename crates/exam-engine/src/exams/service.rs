use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classifier::{
    tally_completion, ClassificationOutcome, CompletionClassifier, CompletionTally,
};
use super::clock::Clock;
use super::domain::{
    AnswerLog, CategoryAnswers, CategoryId, CategoryResultKey, CenterId, CourseId,
    DeclaredResult, Exam, ExamCategoryResult, ExamEnrollment, ExamId, ExamStatus,
    IntegrityAnomaly, OptionKey, Principal, QuestionKey, Student, StudentId,
};
use super::identifiers::{
    random_token, GenerationRule, IdentifierError, IdentifierGenerator, ACCESS_ALPHABET,
};
use super::reconciler::{ReconciliationReport, ResultReconciler};
use super::repository::{
    AuditEntry, AuditSink, ExamRepository, IdentifierScope, RepositoryError,
    UniqueConstraint,
};
use super::scoring::ScoreAggregator;
use super::sweeper::{OverdueExamSweeper, SweepError, SweepSummary};
use crate::config::EngineConfig;

pub const ADMIN_CANCELLATION_REASON: &str = "cancelled by administrator";

/// Facade composing identifier allocation, scoring, reconciliation, and classification.
pub struct ExamLifecycleService<R, A> {
    repository: Arc<R>,
    audit: Arc<A>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    identifiers: IdentifierGenerator<R>,
    aggregator: ScoreAggregator,
    reconciler: ResultReconciler<R, A>,
    classifier: Arc<CompletionClassifier<R, A>>,
    sweeper: Arc<OverdueExamSweeper<R, A>>,
}

impl<R, A> ExamLifecycleService<R, A>
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    pub fn new(
        repository: Arc<R>,
        audit: Arc<A>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let identifiers = IdentifierGenerator::new(repository.clone(), clock.clone(), &config);
        let reconciler = ResultReconciler::new(
            repository.clone(),
            audit.clone(),
            clock.clone(),
            config.write_retries,
        );
        let classifier = Arc::new(CompletionClassifier::new(
            repository.clone(),
            audit.clone(),
            clock.clone(),
        ));
        let sweeper = Arc::new(OverdueExamSweeper::new(
            classifier.clone(),
            repository.clone(),
            audit.clone(),
            clock.clone(),
            config.sweep_workers,
        ));

        Self {
            repository,
            audit,
            clock,
            config,
            identifiers,
            aggregator: ScoreAggregator,
            reconciler,
            classifier,
            sweeper,
        }
    }

    /// Shared handle for schedulers that drive the sweep outside request handling.
    pub fn sweeper(&self) -> Arc<OverdueExamSweeper<R, A>> {
        self.sweeper.clone()
    }

    /// Register a student, allocating the next registration number for their center.
    pub fn register_student(&self, request: NewStudent) -> Result<Student, ExamServiceError> {
        let NewStudent { center_id, name } = request;
        let prefix = match center_id {
            Some(center) => format!("{}{:03}-", self.config.registration_prefix, center.0),
            None => format!("{}-", self.config.registration_prefix),
        };
        let rule = GenerationRule::Sequential {
            prefix,
            width: self.config.registration_width,
        };
        let scope = IdentifierScope::RegistrationNumber { center_id };

        let student = self.identifiers.insert_unique(&scope, &rule, |number| {
            self.repository.insert_student(Student {
                id: StudentId(0),
                center_id,
                registration_number: number.to_string(),
                name: name.clone(),
            })
        })?;

        tracing::info!(
            student_id = %student.id,
            registration_number = %student.registration_number,
            "student registered"
        );
        Ok(student)
    }

    /// Create the enrollment and its access credentials. Credentials are fixed from here on.
    pub fn enroll_student(
        &self,
        exam_id: &ExamId,
        student_id: &StudentId,
    ) -> Result<ExamEnrollment, ExamServiceError> {
        let exam = self.exam(exam_id)?;
        if exam.status != ExamStatus::Scheduled {
            return Err(ExamServiceError::InvalidState(format!(
                "exam {} is {} and no longer accepts enrollments",
                exam.id, exam.status
            )));
        }
        self.repository
            .fetch_student(student_id)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::Student(*student_id)))?;
        if self
            .repository
            .fetch_enrollment(exam_id, student_id)?
            .is_some()
        {
            return Err(already_enrolled(exam_id, student_id));
        }

        let access_secret = random_token(ACCESS_ALPHABET, self.config.access_secret_length);
        let rule = GenerationRule::Random {
            alphabet: ACCESS_ALPHABET,
            length: self.config.access_id_length,
        };
        let enrolled_at = self.clock.now();

        let inserted = self
            .identifiers
            .insert_unique(&IdentifierScope::ExamAccessId, &rule, |access_id| {
                self.repository.insert_enrollment(ExamEnrollment {
                    exam_id: *exam_id,
                    student_id: *student_id,
                    access_id: access_id.to_string(),
                    access_secret: access_secret.clone(),
                    raw_answers: CategoryAnswers::new(),
                    enrolled_at,
                })
            });

        match inserted {
            Ok(enrollment) => Ok(enrollment),
            Err(IdentifierError::Repository(RepositoryError::Conflict(
                UniqueConstraint::Enrollment,
            ))) => Err(already_enrolled(exam_id, student_id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Score a category submission and append its result row.
    pub fn submit_category_result(
        &self,
        submission: CategorySubmission,
    ) -> Result<ExamCategoryResult, ExamServiceError> {
        let CategorySubmission {
            exam_id,
            student_id,
            category_id,
            answers,
        } = submission;

        self.exam(&exam_id)?;
        self.repository
            .fetch_enrollment(&exam_id, &student_id)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::Enrollment {
                exam_id,
                student_id,
            }))?;
        let config = self
            .repository
            .category_config(&exam_id, &category_id)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::CategoryConfig {
                exam_id,
                category_id,
            }))?;
        let questions = self
            .repository
            .questions_for_category(&exam_id, &category_id)?;

        let score = self.aggregator.aggregate(&questions, &answers);
        if score.total_points != config.total_points {
            tracing::warn!(
                %exam_id,
                %category_id,
                configured = config.total_points,
                from_questions = score.total_points,
                "category total points differ from question definitions"
            );
        }

        let mut result = ExamCategoryResult {
            exam_id,
            student_id,
            category_id,
            total_questions: 0,
            answered_questions: 0,
            skipped_questions: 0,
            total_points: 0,
            points_earned: 0,
            percentage: 0.0,
            declared_result: None,
            declared_by: None,
            declared_at: None,
            submitted_at: self.clock.now(),
            raw_answer_log: answers,
            question_scores: Vec::new(),
            version: 1,
        };
        score.apply_to(&mut result);

        let stored = match self.repository.insert_result(result) {
            Ok(stored) => stored,
            Err(RepositoryError::Conflict(UniqueConstraint::CategoryResult)) => {
                return Err(ExamServiceError::InvalidState(format!(
                    "category {category_id} was already submitted for student {student_id}"
                )))
            }
            Err(err) => return Err(err.into()),
        };

        Ok(stored)
    }

    pub fn get_category_result(
        &self,
        key: &CategoryResultKey,
    ) -> Result<ExamCategoryResult, ExamServiceError> {
        self.repository
            .fetch_result(key)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::CategoryResult(*key)))
    }

    /// Stored status plus a read-only completion tally.
    pub fn get_exam_status(&self, exam_id: &ExamId) -> Result<ExamStatusView, ExamServiceError> {
        let exam = self.exam(exam_id)?;
        let enrollments = self.repository.enrollments_for_exam(exam_id)?;
        let results = self.repository.results_for_exam(exam_id)?;

        Ok(ExamStatusView {
            exam_id: exam.id,
            external_id: exam.external_id.clone(),
            course_id: exam.course_id,
            status: exam.status,
            status_reason: exam.status_reason.clone(),
            ends_at: exam.ends_at(),
            completion: tally_completion(&enrollments, &results),
        })
    }

    pub fn declare_result(
        &self,
        key: &CategoryResultKey,
        result: DeclaredResult,
        declared_by: Principal,
    ) -> Result<ExamCategoryResult, ExamServiceError> {
        self.reconciler.declare(key, result, declared_by)
    }

    /// Read-only: reports the recomputed row and any mismatch without writing.
    pub fn recompute_result(
        &self,
        key: &CategoryResultKey,
    ) -> Result<ReconciliationReport, ExamServiceError> {
        self.reconciler.recompute(key)
    }

    /// Explicit write persisting recomputed totals, optionally realigning the declaration.
    pub fn correct_result(
        &self,
        key: &CategoryResultKey,
        declared_by: Principal,
        realign_declaration: bool,
    ) -> Result<ReconciliationReport, ExamServiceError> {
        self.reconciler.correct(key, declared_by, realign_declaration)
    }

    pub fn edit_answer(
        &self,
        key: &CategoryResultKey,
        question_key: &QuestionKey,
        selection: Option<OptionKey>,
    ) -> Result<ExamCategoryResult, ExamServiceError> {
        self.reconciler.edit_answer(key, question_key, selection)
    }

    /// Administrator cancellation, only before any result data exists.
    pub fn cancel_exam(
        &self,
        exam_id: &ExamId,
        cancelled_by: Principal,
    ) -> Result<Exam, ExamServiceError> {
        let mut exam = self.exam(exam_id)?;
        if exam.status != ExamStatus::Scheduled {
            return Err(ExamServiceError::InvalidState(format!(
                "exam {} is {} and cannot be cancelled",
                exam.id, exam.status
            )));
        }
        if !self.repository.results_for_exam(exam_id)?.is_empty() {
            return Err(ExamServiceError::InvalidState(format!(
                "exam {} already has result data",
                exam.id
            )));
        }

        let now = self.clock.now();
        exam.status = ExamStatus::Cancelled;
        exam.status_reason = Some(ADMIN_CANCELLATION_REASON.to_string());
        exam.status_changed_at = Some(now);
        self.repository.update_exam(&exam)?;

        self.audit.record_committed(
            AuditEntry::new("exam_cancelled", exam.external_id.clone(), now)
                .detail("exam_id", exam.id)
                .detail("cancelled_by", &cancelled_by.0),
        );

        Ok(exam)
    }

    pub fn evaluate_exam_status(
        &self,
        exam_id: &ExamId,
    ) -> Result<ClassificationOutcome, ExamServiceError> {
        self.classifier.evaluate(exam_id)
    }

    pub fn evaluate_overdue_exams(&self) -> Result<SweepSummary, SweepError> {
        self.sweeper.run()
    }

    /// Recompute every result of an exam and collect the mismatches. Never writes.
    pub fn integrity_report(&self, exam_id: &ExamId) -> Result<IntegrityReport, ExamServiceError> {
        self.exam(exam_id)?;
        let results = self.repository.results_for_exam(exam_id)?;

        let mut anomalies = Vec::new();
        for result in &results {
            let report = self.reconciler.recompute(&result.key())?;
            if let Some(anomaly) = report.anomaly {
                anomalies.push(anomaly);
            }
        }

        Ok(IntegrityReport {
            exam_id: *exam_id,
            checked: results.len(),
            anomalies,
            generated_at: self.clock.now(),
        })
    }

    fn exam(&self, exam_id: &ExamId) -> Result<Exam, ExamServiceError> {
        self.repository
            .fetch_exam(exam_id)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::Exam(*exam_id)))
    }
}

fn already_enrolled(exam_id: &ExamId, student_id: &StudentId) -> ExamServiceError {
    ExamServiceError::InvalidState(format!(
        "student {student_id} is already enrolled in exam {exam_id}"
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    #[serde(default)]
    pub center_id: Option<CenterId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySubmission {
    pub exam_id: ExamId,
    pub student_id: StudentId,
    pub category_id: CategoryId,
    #[serde(default)]
    pub answers: AnswerLog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExamStatusView {
    pub exam_id: ExamId,
    pub external_id: String,
    pub course_id: CourseId,
    pub status: ExamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    pub ends_at: DateTime<Utc>,
    pub completion: CompletionTally,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub exam_id: ExamId,
    pub checked: usize,
    pub anomalies: Vec<IntegrityAnomaly>,
    pub generated_at: DateTime<Utc>,
}

/// Record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingRecord {
    Exam(ExamId),
    Course(CourseId),
    Student(StudentId),
    Enrollment {
        exam_id: ExamId,
        student_id: StudentId,
    },
    CategoryConfig {
        exam_id: ExamId,
        category_id: CategoryId,
    },
    CategoryResult(CategoryResultKey),
}

impl fmt::Display for MissingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingRecord::Exam(id) => write!(f, "exam {id}"),
            MissingRecord::Course(id) => write!(f, "course {id}"),
            MissingRecord::Student(id) => write!(f, "student {id}"),
            MissingRecord::Enrollment {
                exam_id,
                student_id,
            } => write!(f, "enrollment of student {student_id} in exam {exam_id}"),
            MissingRecord::CategoryConfig {
                exam_id,
                category_id,
            } => write!(f, "category {category_id} configuration for exam {exam_id}"),
            MissingRecord::CategoryResult(key) => write!(f, "category result for {key}"),
        }
    }
}

/// Typed failure of every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum ExamServiceError {
    #[error("{0} not found")]
    NotFound(MissingRecord),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for ExamServiceError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(_) | RepositoryError::StaleVersion { .. } => {
                Self::ConcurrencyConflict(value.to_string())
            }
            other => Self::Repository(other),
        }
    }
}

impl From<IdentifierError> for ExamServiceError {
    fn from(value: IdentifierError) -> Self {
        match value {
            IdentifierError::Exhausted { .. } => Self::ConcurrencyConflict(value.to_string()),
            IdentifierError::Repository(err) => err.into(),
        }
    }
}
