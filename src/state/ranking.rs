use std::{cmp::Ordering, collections::HashMap};

use crate::state::{
    ledger::AnswerLedger,
    room::{BattleRoom, Participant},
};

/// Final position of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalStanding {
    /// Participant user id.
    pub user_id: String,
    /// Display name at completion time.
    pub display_name: String,
    /// Accumulated score.
    pub total_score: u32,
    /// Number of correctly answered questions.
    pub correct_answers: u32,
    /// Sum of offsets over correct answers, in milliseconds.
    pub correct_offset_ms: u64,
    /// Dense 1-based rank; never shared.
    pub rank: u32,
}

/// Inputs of the tie-break chain for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingInput {
    /// Participant user id.
    pub user_id: String,
    /// Display name carried through to the standing.
    pub display_name: String,
    /// Primary key.
    pub total_score: u32,
    /// First tie-break, higher wins.
    pub correct_answers: u32,
    /// Second tie-break, lower wins.
    pub correct_offset_ms: u64,
}

/// Rank participants: score desc, correct answers desc, cumulative correct offset asc,
/// then user id asc. Every participant receives a distinct rank.
pub fn resolve(mut inputs: Vec<StandingInput>) -> Vec<FinalStanding> {
    inputs.sort_by(compare);
    inputs
        .into_iter()
        .zip(1u32..)
        .map(|(input, rank)| FinalStanding {
            user_id: input.user_id,
            display_name: input.display_name,
            total_score: input.total_score,
            correct_answers: input.correct_answers,
            correct_offset_ms: input.correct_offset_ms,
            rank,
        })
        .collect()
}

fn compare(a: &StandingInput, b: &StandingInput) -> Ordering {
    b.total_score
        .cmp(&a.total_score)
        .then_with(|| b.correct_answers.cmp(&a.correct_answers))
        .then_with(|| a.correct_offset_ms.cmp(&b.correct_offset_ms))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Derive tie-break inputs from the room roster and its ledger.
pub fn standings_for(room: &BattleRoom, ledger: &AnswerLedger) -> Vec<FinalStanding> {
    let correct_by_id: HashMap<&str, u8> = room
        .questions
        .iter()
        .map(|question| (question.id.as_str(), question.correct_index))
        .collect();

    let mut stats: HashMap<&str, (u32, u64)> = HashMap::new();
    for entry in ledger.entries().filter(|entry| entry.scored) {
        let correct = correct_by_id
            .get(entry.question_id.as_str())
            .is_some_and(|&index| entry.selected_index == index as i8);
        if correct {
            let slot = stats.entry(entry.user_id.as_str()).or_default();
            slot.0 += 1;
            slot.1 += entry.submitted_at_offset_ms;
        }
    }

    let inputs = room
        .participants
        .values()
        .map(|participant: &Participant| {
            let (correct_answers, correct_offset_ms) = stats
                .get(participant.user_id.as_str())
                .copied()
                .unwrap_or_default();
            StandingInput {
                user_id: participant.user_id.clone(),
                display_name: participant.display_name.clone(),
                total_score: participant.score,
                correct_answers,
                correct_offset_ms,
            }
        })
        .collect();

    resolve(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(user_id: &str, score: u32, correct: u32, offset: u64) -> StandingInput {
        StandingInput {
            user_id: user_id.into(),
            display_name: user_id.to_uppercase(),
            total_score: score,
            correct_answers: correct,
            correct_offset_ms: offset,
        }
    }

    fn order(standings: &[FinalStanding]) -> Vec<(&str, u32)> {
        standings
            .iter()
            .map(|s| (s.user_id.as_str(), s.rank))
            .collect()
    }

    #[test]
    fn higher_score_ranks_first() {
        let standings = resolve(vec![input("a", 10, 1, 0), input("b", 30, 2, 0)]);
        assert_eq!(order(&standings), vec![("b", 1), ("a", 2)]);
    }

    #[test]
    fn ties_fall_through_the_chain() {
        let standings = resolve(vec![
            input("d", 20, 1, 0),
            input("c", 20, 2, 9_000),
            input("b", 20, 2, 4_000),
            input("a", 20, 2, 4_000),
        ]);
        assert_eq!(
            order(&standings),
            vec![("a", 1), ("b", 2), ("c", 3), ("d", 4)]
        );
    }

    #[test]
    fn full_ties_are_resolved_lexicographically() {
        let standings = resolve(vec![
            input("carol", 75, 5, 0),
            input("alice", 75, 5, 0),
            input("bob", 75, 5, 0),
        ]);
        assert_eq!(
            order(&standings),
            vec![("alice", 1), ("bob", 2), ("carol", 3)]
        );
    }

    #[test]
    fn resolving_twice_is_identical() {
        let inputs = vec![input("x", 5, 1, 10), input("y", 5, 1, 10), input("z", 7, 1, 99)];
        assert_eq!(resolve(inputs.clone()), resolve(inputs));
    }
}
