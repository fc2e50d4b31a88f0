mod rules;

pub use rules::percentage;

use serde::{Deserialize, Serialize};

use super::domain::{
    AnswerLog, AnswerOutcome, ExamCategoryResult, OptionKey, QuestionDefinition, QuestionScore,
};
use rules::score_question;

/// Aggregate of one category attempt: per-question lines plus the rolled-up totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub total_questions: u32,
    pub answered_questions: u32,
    pub skipped_questions: u32,
    pub total_points: u32,
    pub points_earned: u32,
    pub percentage: f64,
    pub questions: Vec<QuestionScore>,
}

impl CategoryScore {
    /// Copy the aggregate onto a result row, leaving declaration and versioning alone.
    pub fn apply_to(&self, result: &mut ExamCategoryResult) {
        result.total_questions = self.total_questions;
        result.answered_questions = self.answered_questions;
        result.skipped_questions = self.skipped_questions;
        result.total_points = self.total_points;
        result.points_earned = self.points_earned;
        result.percentage = self.percentage;
        result.question_scores = self.questions.clone();
    }

    /// Rebuild the totals from per-question lines.
    pub fn from_questions(questions: Vec<QuestionScore>) -> Self {
        let total_questions = saturating_count(questions.len());
        let answered_questions = saturating_count(
            questions
                .iter()
                .filter(|line| line.outcome != AnswerOutcome::Skipped)
                .count(),
        );
        let total_points = saturating_sum(questions.iter().map(|line| line.full_points));
        let points_earned = saturating_sum(questions.iter().map(|line| line.earned_points));

        Self {
            total_questions,
            answered_questions,
            skipped_questions: total_questions - answered_questions,
            total_points,
            points_earned,
            percentage: percentage(points_earned, total_points),
            questions,
        }
    }
}

fn saturating_count(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn saturating_sum(points: impl Iterator<Item = u32>) -> u32 {
    points.fold(0, u32::saturating_add)
}

/// Stateless converter from raw answers to category scores. Persistence is the caller's job.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoreAggregator;

impl ScoreAggregator {
    pub fn aggregate(
        &self,
        questions: &[QuestionDefinition],
        answers: &AnswerLog,
    ) -> CategoryScore {
        let lines = questions
            .iter()
            .map(|question| score_question(question, answers.get(&question.key)))
            .collect::<Vec<_>>();

        let ignored = answers
            .keys()
            .filter(|key| !questions.iter().any(|question| &question.key == *key))
            .count();
        if ignored > 0 {
            tracing::debug!(ignored, "answers for unknown questions ignored during scoring");
        }

        CategoryScore::from_questions(lines)
    }

    /// Re-score a single question and roll the aggregate forward, leaving every other line as
    /// stored. Returns `None` when the question is not part of the score.
    pub fn rescore_question(
        &self,
        score: &CategoryScore,
        question: &QuestionDefinition,
        selection: Option<&OptionKey>,
    ) -> Option<CategoryScore> {
        let position = score
            .questions
            .iter()
            .position(|line| line.key == question.key)?;

        let mut lines = score.questions.clone();
        lines[position] = score_question(question, selection);
        Some(CategoryScore::from_questions(lines))
    }
}
