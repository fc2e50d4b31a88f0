use super::super::domain::{AnswerOutcome, OptionKey, QuestionDefinition, QuestionScore};

/// Score one question. A selection outside the question's options is simply incorrect.
pub(crate) fn score_question(
    question: &QuestionDefinition,
    selected: Option<&OptionKey>,
) -> QuestionScore {
    let (outcome, earned_points) = match selected {
        None => (AnswerOutcome::Skipped, 0),
        Some(option) if *option == question.correct_option => {
            (AnswerOutcome::Correct, question.points)
        }
        Some(_) => (AnswerOutcome::Incorrect, 0),
    };

    QuestionScore {
        key: question.key.clone(),
        selected: selected.cloned(),
        full_points: question.points,
        earned_points,
        outcome,
    }
}

/// `round(earned / total * 100, 2)` clamped to `[0, 100]`; a zero total yields `0.0`.
pub fn percentage(points_earned: u32, total_points: u32) -> f64 {
    if total_points == 0 {
        return 0.0;
    }

    let raw = f64::from(points_earned) / f64::from(total_points) * 100.0;
    let rounded = (raw * 100.0).round() / 100.0;
    rounded.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exams::domain::QuestionKey;

    fn question() -> QuestionDefinition {
        QuestionDefinition {
            key: QuestionKey("q-1".to_string()),
            correct_option: OptionKey("B".to_string()),
            points: 3,
            options: vec![
                OptionKey("A".to_string()),
                OptionKey("B".to_string()),
                OptionKey("C".to_string()),
            ],
        }
    }

    #[test]
    fn correct_selection_earns_full_points() {
        let score = score_question(&question(), Some(&OptionKey("B".to_string())));
        assert_eq!(score.outcome, AnswerOutcome::Correct);
        assert_eq!(score.earned_points, 3);
    }

    #[test]
    fn foreign_option_counts_as_incorrect() {
        let score = score_question(&question(), Some(&OptionKey("Z".to_string())));
        assert_eq!(score.outcome, AnswerOutcome::Incorrect);
        assert_eq!(score.earned_points, 0);
        assert_eq!(score.selected, Some(OptionKey("Z".to_string())));
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(12, 20), 60.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(20, 20), 100.0);
    }

    #[test]
    fn percentage_guards_zero_totals() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 0), 0.0);
    }

    #[test]
    fn percentage_is_clamped() {
        assert_eq!(percentage(25, 20), 100.0);
    }
}
