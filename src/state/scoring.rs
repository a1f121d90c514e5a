//! Pure scoring rules applied to ledger entries when a question is revealed.

use crate::state::{ledger::AnswerEntry, room::Question};

/// Share of the base points available as speed bonus for an instant answer.
const MAX_SPEED_BONUS_RATIO: f64 = 0.5;

/// Points awarded for one answer, split into its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoreBreakdown {
    /// Whether the selected option was the correct one.
    pub correct: bool,
    /// Base points (0 for wrong or missing answers).
    pub base: u32,
    /// Speed bonus on top of the base points.
    pub speed_bonus: u32,
    /// `base + speed_bonus`.
    pub points: u32,
}

/// Score a single ledger entry against its question definition.
///
/// Wrong and missing answers score zero. A correct answer earns the base points plus a
/// bonus decaying linearly from 50% of the base at offset 0 to nothing at the deadline.
pub fn score(entry: &AnswerEntry, question: &Question) -> ScoreBreakdown {
    if entry.is_timeout() || entry.selected_index != question.correct_index as i8 {
        return ScoreBreakdown::default();
    }

    let base = question.base_points;
    let speed_bonus = speed_bonus(base, entry.submitted_at_offset_ms, question.time_limit_ms());

    ScoreBreakdown {
        correct: true,
        base,
        speed_bonus,
        points: base.saturating_add(speed_bonus),
    }
}

fn speed_bonus(base_points: u32, offset_ms: u64, limit_ms: u64) -> u32 {
    if limit_ms == 0 {
        return 0;
    }
    let remaining = 1.0 - (offset_ms as f64 / limit_ms as f64);
    let bonus = (f64::from(base_points) * MAX_SPEED_BONUS_RATIO * remaining).round();
    bonus.max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::{NO_ANSWER, tests::question};

    fn entry(selected_index: i8, offset_ms: u64) -> AnswerEntry {
        AnswerEntry {
            question_id: "q1".into(),
            user_id: "alice".into(),
            selected_index,
            submitted_at_offset_ms: offset_ms,
            scored: false,
        }
    }

    #[test]
    fn instant_correct_answer_earns_half_bonus() {
        let q = question("q1", 2, 30, 10);
        let result = score(&entry(2, 0), &q);
        assert_eq!(result.points, 15);
        assert_eq!(result.speed_bonus, 5);
        assert!(result.correct);
    }

    #[test]
    fn halfway_bonus_rounds_half_up() {
        let q = question("q1", 2, 30, 10);
        assert_eq!(score(&entry(2, 15_000), &q).points, 13);
    }

    #[test]
    fn bonus_reaches_zero_at_the_deadline() {
        let q = question("q1", 1, 20, 100);
        let result = score(&entry(1, 20_000), &q);
        assert_eq!(result.speed_bonus, 0);
        assert_eq!(result.points, 100);
    }

    #[test]
    fn wrong_and_missing_answers_score_nothing() {
        let q = question("q1", 3, 10, 50);
        assert_eq!(score(&entry(0, 0), &q), ScoreBreakdown::default());
        assert_eq!(score(&entry(NO_ANSWER, 10_000), &q), ScoreBreakdown::default());
    }

    #[test]
    fn scoring_is_deterministic() {
        let q = question("q1", 0, 15, 7);
        let e = entry(0, 4_321);
        assert_eq!(score(&e, &q), score(&e, &q));
    }
}
