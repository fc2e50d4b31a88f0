use std::sync::Arc;

use serde::Serialize;

use super::clock::Clock;
use super::domain::{
    CategoryResultKey, DeclaredResult, ExamCategoryConfig, ExamCategoryResult, IntegrityAnomaly,
    OptionKey, Principal, QuestionDefinition, QuestionKey,
};
use super::repository::{AuditEntry, AuditSink, ExamRepository, RepositoryError};
use super::scoring::{CategoryScore, ScoreAggregator};
use super::service::{ExamServiceError, MissingRecord};

/// Outcome of recomputing a stored result against the current category configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub key: CategoryResultKey,
    /// Row as it would look after recomputation; only persisted by an explicit correction.
    pub recomputed: ExamCategoryResult,
    pub stored_points_earned: u32,
    pub stored_percentage: f64,
    pub computed: DeclaredResult,
    pub declared: Option<DeclaredResult>,
    pub passing_points: u32,
    pub anomaly: Option<IntegrityAnomaly>,
}

impl ReconciliationReport {
    pub fn totals_changed(&self) -> bool {
        self.recomputed.points_earned != self.stored_points_earned
            || self.recomputed.percentage != self.stored_percentage
    }
}

/// Declares, recomputes, corrects, and edits category results. Writes are version-checked
/// and retried from a fresh read on a stale version.
pub struct ResultReconciler<R, A> {
    repository: Arc<R>,
    audit: Arc<A>,
    clock: Arc<dyn Clock>,
    aggregator: ScoreAggregator,
    write_retries: u32,
}

impl<R, A> ResultReconciler<R, A>
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    pub fn new(
        repository: Arc<R>,
        audit: Arc<A>,
        clock: Arc<dyn Clock>,
        write_retries: u32,
    ) -> Self {
        Self {
            repository,
            audit,
            clock,
            aggregator: ScoreAggregator,
            write_retries,
        }
    }

    /// Record the administrator's outcome. Re-declaring overwrites the previous declaration.
    pub fn declare(
        &self,
        key: &CategoryResultKey,
        declared: DeclaredResult,
        declared_by: Principal,
    ) -> Result<ExamCategoryResult, ExamServiceError> {
        self.submitted(key)?;
        let config = self.config(key)?;
        let now = self.clock.now();

        let mut previous = None;
        let stored = self.write(key, |mut current| {
            previous = current.declared_result;
            current.declared_result = Some(declared);
            current.declared_by = Some(declared_by.clone());
            current.declared_at = Some(now);
            Ok(current)
        })?;

        let computed = DeclaredResult::from_passed(config.is_passing(stored.points_earned));
        if computed != declared {
            tracing::warn!(
                %key,
                %computed,
                %declared,
                "declared result disagrees with computed outcome"
            );
        }

        self.audit.record_committed(
            AuditEntry::new("result_declared", key.to_string(), now)
                .detail("declared", declared)
                .detail(
                    "previous",
                    previous.map(DeclaredResult::label).unwrap_or("none"),
                )
                .detail("declared_by", &declared_by.0),
        );

        Ok(stored)
    }

    /// Recalculate the row from its raw answer log and compare against the declaration.
    /// Never writes.
    pub fn recompute(
        &self,
        key: &CategoryResultKey,
    ) -> Result<ReconciliationReport, ExamServiceError> {
        let current = self.submitted(key)?;
        let config = self.config(key)?;
        let questions = self
            .repository
            .questions_for_category(&key.exam_id, &key.category_id)?;

        let report = self.reconcile(&current, &config, &questions);
        if let Some(anomaly) = &report.anomaly {
            tracing::warn!(anomaly = %anomaly.summary(), "integrity anomaly detected");
        }
        Ok(report)
    }

    /// Persist recomputed totals; with `realign_declaration` also overwrite the declaration
    /// with the computed outcome.
    pub fn correct(
        &self,
        key: &CategoryResultKey,
        declared_by: Principal,
        realign_declaration: bool,
    ) -> Result<ReconciliationReport, ExamServiceError> {
        let before = self.submitted(key)?;
        let config = self.config(key)?;
        let questions = self
            .repository
            .questions_for_category(&key.exam_id, &key.category_id)?;
        let now = self.clock.now();

        let stored = self.write(key, |current| {
            let report = self.reconcile(&current, &config, &questions);
            let mut row = report.recomputed;
            if realign_declaration && report.declared != Some(report.computed) {
                row.declared_result = Some(report.computed);
                row.declared_by = Some(declared_by.clone());
                row.declared_at = Some(now);
            }
            Ok(row)
        })?;

        self.audit.record_committed(
            AuditEntry::new("result_corrected", key.to_string(), now)
                .detail("points_before", before.points_earned)
                .detail("points_after", stored.points_earned)
                .detail(
                    "declared_before",
                    before.declared_result.map(DeclaredResult::label).unwrap_or("none"),
                )
                .detail(
                    "declared_after",
                    stored.declared_result.map(DeclaredResult::label).unwrap_or("none"),
                )
                .detail("corrected_by", &declared_by.0),
        );

        let mut report = self.reconcile(&stored, &config, &questions);
        report.stored_points_earned = before.points_earned;
        report.stored_percentage = before.percentage;
        Ok(report)
    }

    /// Change one answer on a submitted result, re-scoring only that question.
    pub fn edit_answer(
        &self,
        key: &CategoryResultKey,
        question_key: &QuestionKey,
        selection: Option<OptionKey>,
    ) -> Result<ExamCategoryResult, ExamServiceError> {
        self.submitted(key)?;
        let question = self
            .repository
            .questions_for_category(&key.exam_id, &key.category_id)?
            .into_iter()
            .find(|question| &question.key == question_key)
            .ok_or_else(|| {
                ExamServiceError::InvalidState(format!(
                    "question {} is not part of category {}",
                    question_key.0, key.category_id
                ))
            })?;

        let stored = self.write(key, |mut current| {
            let score = CategoryScore::from_questions(current.question_scores.clone());
            let rescored = self
                .aggregator
                .rescore_question(&score, &question, selection.as_ref())
                .ok_or_else(|| {
                    ExamServiceError::InvalidState(format!(
                        "question {} was not scored in the original submission",
                        question_key.0
                    ))
                })?;

            rescored.apply_to(&mut current);
            match &selection {
                Some(option) => {
                    current
                        .raw_answer_log
                        .insert(question_key.clone(), option.clone());
                }
                None => {
                    current.raw_answer_log.remove(question_key);
                }
            }
            Ok(current)
        })?;

        if let (Some(config), Some(declared)) = (
            self.repository
                .category_config(&key.exam_id, &key.category_id)?,
            stored.declared_result,
        ) {
            let computed = DeclaredResult::from_passed(config.is_passing(stored.points_earned));
            if computed != declared {
                tracing::warn!(
                    %key,
                    %computed,
                    %declared,
                    "answer edit left the declaration out of step with the computed outcome"
                );
            }
        }

        Ok(stored)
    }

    fn reconcile(
        &self,
        current: &ExamCategoryResult,
        config: &ExamCategoryConfig,
        questions: &[QuestionDefinition],
    ) -> ReconciliationReport {
        let score = self
            .aggregator
            .aggregate(questions, &current.raw_answer_log);
        let mut recomputed = current.clone();
        score.apply_to(&mut recomputed);

        let computed = DeclaredResult::from_passed(config.is_passing(score.points_earned));
        let anomaly = match current.declared_result {
            Some(declared) if declared != computed => Some(IntegrityAnomaly {
                key: current.key(),
                computed,
                declared,
                points_earned: score.points_earned,
                passing_points: config.passing_points,
            }),
            _ => None,
        };

        ReconciliationReport {
            key: current.key(),
            recomputed,
            stored_points_earned: current.points_earned,
            stored_percentage: current.percentage,
            computed,
            declared: current.declared_result,
            passing_points: config.passing_points,
            anomaly,
        }
    }

    /// The stored row, or `InvalidState` when the category was never submitted.
    fn submitted(
        &self,
        key: &CategoryResultKey,
    ) -> Result<ExamCategoryResult, ExamServiceError> {
        self.repository
            .fetch_exam(&key.exam_id)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::Exam(key.exam_id)))?;
        self.repository
            .fetch_enrollment(&key.exam_id, &key.student_id)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::Enrollment {
                exam_id: key.exam_id,
                student_id: key.student_id,
            }))?;
        self.repository.fetch_result(key)?.ok_or_else(|| {
            ExamServiceError::InvalidState(format!("category result for {key} was never submitted"))
        })
    }

    fn config(&self, key: &CategoryResultKey) -> Result<ExamCategoryConfig, ExamServiceError> {
        self.repository
            .category_config(&key.exam_id, &key.category_id)?
            .ok_or(ExamServiceError::NotFound(MissingRecord::CategoryConfig {
                exam_id: key.exam_id,
                category_id: key.category_id,
            }))
    }

    /// Read-modify-write guarded by the row version.
    fn write<F>(
        &self,
        key: &CategoryResultKey,
        mut mutate: F,
    ) -> Result<ExamCategoryResult, ExamServiceError>
    where
        F: FnMut(ExamCategoryResult) -> Result<ExamCategoryResult, ExamServiceError>,
    {
        for attempt in 0..=self.write_retries {
            let current = self.repository.fetch_result(key)?.ok_or_else(|| {
                ExamServiceError::InvalidState(format!(
                    "category result for {key} was never submitted"
                ))
            })?;
            let expected_version = current.version;
            let updated = mutate(current)?;

            match self.repository.update_result(updated, expected_version) {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::StaleVersion { expected, found }) => {
                    tracing::warn!(%key, expected, found, attempt, "stale result write, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ExamServiceError::ConcurrencyConflict(format!(
            "category result for {key} kept changing after {} attempt(s)",
            self.write_retries + 1
        )))
    }
}
