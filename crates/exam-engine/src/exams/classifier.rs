use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::clock::Clock;
use super::domain::{ExamCategoryResult, ExamEnrollment, ExamId, ExamStatus, StudentId};
use super::repository::{AuditEntry, AuditSink, ExamRepository};
use super::service::{ExamServiceError, MissingRecord};

pub const NO_COMPLETIONS_REASON: &str = "no students completed";

/// Enrollments with at least one declared category result, out of all enrollments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTally {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: ExamStatus,
    pub reason: Option<&'static str>,
}

/// Status as a pure function of the tally. Zero enrollments classify as cancelled.
pub fn classify(tally: CompletionTally) -> Classification {
    let CompletionTally { completed, total } = tally;
    if total > 0 && completed >= total {
        Classification {
            status: ExamStatus::Completed,
            reason: None,
        }
    } else if completed > 0 {
        Classification {
            status: ExamStatus::PartialCompleted,
            reason: None,
        }
    } else {
        Classification {
            status: ExamStatus::Cancelled,
            reason: Some(NO_COMPLETIONS_REASON),
        }
    }
}

pub fn tally_completion(
    enrollments: &[ExamEnrollment],
    results: &[ExamCategoryResult],
) -> CompletionTally {
    let declared: BTreeSet<StudentId> = results
        .iter()
        .filter(|result| result.is_declared())
        .map(|result| result.student_id)
        .collect();

    CompletionTally {
        completed: enrollments
            .iter()
            .filter(|enrollment| declared.contains(&enrollment.student_id))
            .count(),
        total: enrollments.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationOutcome {
    pub exam_id: ExamId,
    pub external_id: String,
    pub previous: ExamStatus,
    pub status: ExamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub completion: CompletionTally,
    /// False when the stored status already matched and nothing was written.
    pub changed: bool,
    /// False when the transition was written but its audit entry could not be recorded.
    pub audited: bool,
}

/// Derives and persists exam status from enrollment completion.
pub struct CompletionClassifier<R, A> {
    repository: Arc<R>,
    audit: Arc<A>,
    clock: Arc<dyn Clock>,
}

impl<R, A> CompletionClassifier<R, A>
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    pub fn new(repository: Arc<R>, audit: Arc<A>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            audit,
            clock,
        }
    }

    pub fn evaluate(&self, exam_id: &ExamId) -> Result<ClassificationOutcome, ExamServiceError> {
        let mut exam = self
            .repository
            .fetch_exam(exam_id)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::Exam(*exam_id)))?;
        self.repository
            .fetch_course(&exam.course_id)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::Course(exam.course_id)))?;

        let enrollments = self.repository.enrollments_for_exam(exam_id)?;
        let results = self.repository.results_for_exam(exam_id)?;
        let completion = tally_completion(&enrollments, &results);
        let classification = classify(completion);
        let previous = exam.status;

        if previous == classification.status {
            tracing::debug!(
                exam_id = %exam.id,
                status = %previous,
                "exam status unchanged"
            );
            return Ok(ClassificationOutcome {
                exam_id: exam.id,
                external_id: exam.external_id,
                previous,
                status: previous,
                reason: exam.status_reason,
                completion,
                changed: false,
                audited: true,
            });
        }

        let now = self.clock.now();
        exam.status = classification.status;
        exam.status_reason = classification.reason.map(str::to_string);
        exam.status_changed_at = Some(now);
        self.repository.update_exam(&exam)?;

        tracing::info!(
            exam_id = %exam.id,
            external_id = %exam.external_id,
            from = %previous,
            to = %exam.status,
            completed = completion.completed,
            total = completion.total,
            "exam status changed"
        );

        let audited = self.audit.record_committed(
            AuditEntry::new("exam_status_changed", exam.external_id.clone(), now)
                .detail("exam_id", exam.id)
                .detail("from", previous)
                .detail("to", exam.status)
                .detail("completed", completion.completed)
                .detail("total", completion.total)
                .detail("reason", classification.reason.unwrap_or("")),
        );

        Ok(ClassificationOutcome {
            exam_id: exam.id,
            external_id: exam.external_id,
            previous,
            status: exam.status,
            reason: exam.status_reason,
            completion,
            changed: true,
            audited,
        })
    }
}
