//! Exam lifecycle: identifier allocation, category scoring, result reconciliation, completion
//! classification, and the overdue sweep.

pub mod classifier;
pub mod clock;
pub mod domain;
pub mod identifiers;
pub mod memory;
pub mod reconciler;
pub mod repository;
pub mod router;
pub mod scoring;
pub mod service;
pub mod sweeper;

#[cfg(test)]
mod tests;

pub use classifier::{
    classify, tally_completion, Classification, ClassificationOutcome, CompletionClassifier,
    CompletionTally, NO_COMPLETIONS_REASON,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    AnswerLog, AnswerOutcome, CategoryAnswers, CategoryId, CategoryResultKey, CenterId, Course, CourseId,
    DeclaredResult, Exam, ExamCategoryConfig, ExamCategoryResult, ExamEnrollment, ExamId,
    ExamStatus, IntegrityAnomaly, OptionKey, Principal, QuestionDefinition, QuestionKey,
    QuestionScore, Student, StudentId,
};
pub use identifiers::{
    Allocation, GenerationRule, IdentifierError, IdentifierGenerator, ACCESS_ALPHABET,
};
pub use memory::{CategoryQuestions, ExamSnapshot, InMemoryAuditLog, InMemoryExamRepository};
pub use reconciler::{ReconciliationReport, ResultReconciler};
pub use repository::{
    AuditEntry, AuditError, AuditSink, ExamRepository, IdentifierScope, RepositoryError,
    TracingAuditSink, UniqueConstraint,
};
pub use router::exam_router;
pub use scoring::{percentage, CategoryScore, ScoreAggregator};
pub use service::{
    CategorySubmission, ExamLifecycleService, ExamServiceError, ExamStatusView, IntegrityReport,
    MissingRecord, NewStudent, ADMIN_CANCELLATION_REASON,
};
pub use sweeper::{OverdueExamSweeper, SweepError, SweepFailure, SweepSummary};
