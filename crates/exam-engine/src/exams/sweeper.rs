use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::classifier::{ClassificationOutcome, CompletionClassifier};
use super::clock::Clock;
use super::domain::{Exam, ExamId, ExamStatus};
use super::repository::{AuditEntry, AuditSink, ExamRepository, RepositoryError};
use super::service::ExamServiceError;

/// Exam whose evaluation failed during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub exam_id: ExamId,
    pub external_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub considered_count: usize,
    pub updated_count: usize,
    pub failed_count: usize,
    /// Exams whose new status was written but whose transition audit was lost.
    pub unaudited: Vec<ExamId>,
    pub failures: Vec<SweepFailure>,
    pub started_at: DateTime<Utc>,
}

/// Top-level sweep failure. Per-exam errors never surface here.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

enum ExamVerdict {
    Evaluated(ClassificationOutcome),
    Failed(SweepFailure),
}

/// Batch driver re-classifying scheduled and cancelled exams whose window has ended.
pub struct OverdueExamSweeper<R, A> {
    classifier: Arc<CompletionClassifier<R, A>>,
    repository: Arc<R>,
    audit: Arc<A>,
    clock: Arc<dyn Clock>,
    workers: usize,
}

impl<R, A> OverdueExamSweeper<R, A>
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    pub fn new(
        classifier: Arc<CompletionClassifier<R, A>>,
        repository: Arc<R>,
        audit: Arc<A>,
        clock: Arc<dyn Clock>,
        workers: usize,
    ) -> Self {
        Self {
            classifier,
            repository,
            audit,
            clock,
            workers: workers.max(1),
        }
    }

    pub fn run(&self) -> Result<SweepSummary, SweepError> {
        let started_at = self.clock.now();
        let candidates = self.candidates(started_at)?;
        let considered_count = candidates.len();

        let verdicts = self.evaluate_all(&candidates);

        let mut updated_count = 0;
        let mut unaudited = Vec::new();
        let mut failures = Vec::new();
        for verdict in verdicts {
            match verdict {
                ExamVerdict::Evaluated(outcome) if outcome.changed => {
                    updated_count += 1;
                    if !outcome.audited {
                        unaudited.push(outcome.exam_id);
                    }
                }
                ExamVerdict::Evaluated(_) => {}
                ExamVerdict::Failed(failure) => {
                    tracing::error!(
                        exam_id = %failure.exam_id,
                        external_id = %failure.external_id,
                        error = %failure.error,
                        "exam evaluation failed during sweep"
                    );
                    failures.push(failure);
                }
            }
        }
        failures.sort_by_key(|failure| failure.exam_id);
        unaudited.sort();

        let summary = SweepSummary {
            considered_count,
            updated_count,
            failed_count: failures.len(),
            unaudited,
            failures,
            started_at,
        };

        tracing::info!(
            considered = summary.considered_count,
            updated = summary.updated_count,
            failed = summary.failed_count,
            "overdue exam sweep finished"
        );

        if summary.updated_count > 0 {
            self.audit.record_committed(
                AuditEntry::new("overdue_sweep_completed", "exams", self.clock.now())
                    .detail("considered", summary.considered_count)
                    .detail("updated", summary.updated_count)
                    .detail("failed", summary.failed_count),
            );
        }

        Ok(summary)
    }

    /// Scheduled and cancelled exams ended before `now`, each once, ordered by id.
    fn candidates(&self, now: DateTime<Utc>) -> Result<Vec<Exam>, RepositoryError> {
        let mut unique = BTreeMap::new();
        for status in [ExamStatus::Scheduled, ExamStatus::Cancelled] {
            for exam in self.repository.exams_ended_before(status, now)? {
                unique.entry(exam.id).or_insert(exam);
            }
        }
        Ok(unique.into_values().collect())
    }

    fn evaluate_all(&self, exams: &[Exam]) -> Vec<ExamVerdict> {
        if exams.is_empty() {
            return Vec::new();
        }

        let chunk_size = exams.len().div_ceil(self.workers);
        thread::scope(|scope| {
            let handles = exams
                .chunks(chunk_size)
                .map(|chunk| {
                    let handle = scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|exam| self.evaluate_one(exam))
                            .collect::<Vec<_>>()
                    });
                    (chunk, handle)
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .flat_map(|(chunk, handle)| match handle.join() {
                    Ok(verdicts) => verdicts,
                    Err(_) => chunk
                        .iter()
                        .map(|exam| {
                            ExamVerdict::Failed(SweepFailure {
                                exam_id: exam.id,
                                external_id: exam.external_id.clone(),
                                error: "evaluation worker panicked".to_string(),
                            })
                        })
                        .collect(),
                })
                .collect()
        })
    }

    fn evaluate_one(&self, exam: &Exam) -> ExamVerdict {
        match self.classifier.evaluate(&exam.id) {
            Ok(outcome) => ExamVerdict::Evaluated(outcome),
            Err(err) => ExamVerdict::Failed(failure(exam, &err)),
        }
    }
}

fn failure(exam: &Exam, err: &ExamServiceError) -> SweepFailure {
    SweepFailure {
        exam_id: exam.id,
        external_id: exam.external_id.clone(),
        error: err.to_string(),
    }
}
