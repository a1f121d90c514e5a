use indexmap::IndexMap;
use tokio::time::Instant;

use crate::{
    error::BattleError,
    state::{
        room::{NO_ANSWER, OPTION_COUNT, Question},
        scoring::{self, ScoreBreakdown},
    },
};

/// One row of the answer ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEntry {
    /// Question the answer belongs to.
    pub question_id: String,
    /// Participant who answered.
    pub user_id: String,
    /// Selected option, or [`NO_ANSWER`] for a timeout.
    pub selected_index: i8,
    /// Milliseconds since the window opened, clamped to the time limit.
    pub submitted_at_offset_ms: u64,
    /// Set exactly once, when the question is revealed.
    pub scored: bool,
}

impl AnswerEntry {
    /// True for entries synthesized (or submitted) without a selection.
    pub fn is_timeout(&self) -> bool {
        self.selected_index == NO_ANSWER
    }
}

#[derive(Debug, Clone)]
struct AnswerWindow {
    question_index: usize,
    question_id: String,
    limit_ms: u64,
    opened_at: Instant,
}

/// Append-only record of answers, at most one per (question, participant).
#[derive(Debug, Clone, Default)]
pub struct AnswerLedger {
    entries: IndexMap<(String, String), AnswerEntry>,
    window: Option<AnswerWindow>,
}

impl AnswerLedger {
    /// Empty ledger with no open window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted entries.
    pub fn from_entries(entries: impl IntoIterator<Item = AnswerEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| ((entry.question_id.clone(), entry.user_id.clone()), entry))
            .collect();
        Self {
            entries,
            window: None,
        }
    }

    /// Open the answer window for `question` at `opened_at`.
    pub fn open(&mut self, question_index: usize, question: &Question, opened_at: Instant) {
        self.window = Some(AnswerWindow {
            question_index,
            question_id: question.id.clone(),
            limit_ms: question.time_limit_ms(),
            opened_at,
        });
    }

    /// Close the current window, returning the index it belonged to.
    pub fn close(&mut self) -> Option<usize> {
        self.window.take().map(|window| window.question_index)
    }

    /// Index of the question whose window is open.
    pub fn open_index(&self) -> Option<usize> {
        self.window.as_ref().map(|window| window.question_index)
    }

    /// Hard deadline of the open window.
    pub fn deadline(&self) -> Option<Instant> {
        self.window.as_ref().map(|window| {
            window.opened_at + std::time::Duration::from_millis(window.limit_ms)
        })
    }

    /// Server-observed milliseconds since the window opened.
    pub fn elapsed_ms(&self, now: Instant) -> Option<u64> {
        self.window.as_ref().map(|window| {
            u64::try_from(now.saturating_duration_since(window.opened_at).as_millis())
                .unwrap_or(u64::MAX)
        })
    }

    /// Record a submission. Rejected when the question is not the open one or the
    /// deadline passed, when the selection is out of range, or when the participant
    /// already has an entry for this question.
    pub fn submit(
        &mut self,
        question_id: &str,
        user_id: &str,
        selected_index: i8,
        offset_ms: u64,
        now: Instant,
    ) -> Result<AnswerEntry, BattleError> {
        let window = self
            .window
            .as_ref()
            .filter(|window| window.question_id == question_id)
            .ok_or(BattleError::QuestionWindowClosed)?;

        if self.elapsed_ms(now).is_some_and(|elapsed| elapsed > window.limit_ms) {
            return Err(BattleError::QuestionWindowClosed);
        }

        if selected_index != NO_ANSWER
            && !(0..OPTION_COUNT as i8).contains(&selected_index)
        {
            return Err(BattleError::InvalidSelection(selected_index));
        }

        let key = (question_id.to_string(), user_id.to_string());
        if self.entries.contains_key(&key) {
            return Err(BattleError::DuplicateSubmission);
        }

        let entry = AnswerEntry {
            question_id: question_id.to_string(),
            user_id: user_id.to_string(),
            selected_index,
            submitted_at_offset_ms: offset_ms.min(window.limit_ms),
            scored: false,
        };
        self.entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// Synthesize full-timeout entries for every listed participant without one.
    pub fn fill_timeouts<'a>(
        &mut self,
        question: &Question,
        user_ids: impl IntoIterator<Item = &'a str>,
    ) -> Vec<AnswerEntry> {
        let mut filled = Vec::new();
        for user_id in user_ids {
            let key = (question.id.clone(), user_id.to_string());
            if self.entries.contains_key(&key) {
                continue;
            }
            let entry = AnswerEntry {
                question_id: question.id.clone(),
                user_id: user_id.to_string(),
                selected_index: NO_ANSWER,
                submitted_at_offset_ms: question.time_limit_ms(),
                scored: false,
            };
            self.entries.insert(key, entry.clone());
            filled.push(entry);
        }
        filled
    }

    /// Score every unscored entry of `question`, marking each as scored.
    pub fn score_pending(&mut self, question: &Question) -> Vec<(AnswerEntry, ScoreBreakdown)> {
        self.entries
            .values_mut()
            .filter(|entry| entry.question_id == question.id && !entry.scored)
            .map(|entry| {
                let breakdown = scoring::score(entry, question);
                entry.scored = true;
                (entry.clone(), breakdown)
            })
            .collect()
    }

    /// Whether `user_id` already has an entry for `question_id`.
    pub fn has_entry(&self, question_id: &str, user_id: &str) -> bool {
        self.entries
            .contains_key(&(question_id.to_string(), user_id.to_string()))
    }

    /// Entry recorded for (`question_id`, `user_id`).
    pub fn entry(&self, question_id: &str, user_id: &str) -> Option<&AnswerEntry> {
        self.entries
            .get(&(question_id.to_string(), user_id.to_string()))
    }

    /// Entries of one question, in arrival order.
    pub fn entries_for<'a>(&'a self, question_id: &'a str) -> impl Iterator<Item = &'a AnswerEntry> {
        self.entries
            .values()
            .filter(move |entry| entry.question_id == question_id)
    }

    /// Every entry, in arrival order.
    pub fn entries(&self) -> impl Iterator<Item = &AnswerEntry> {
        self.entries.values()
    }

    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::room::tests::question;

    fn open_ledger() -> (AnswerLedger, Question, Instant) {
        let q = question("q1", 1, 10, 10);
        let mut ledger = AnswerLedger::new();
        let opened = Instant::now();
        ledger.open(0, &q, opened);
        (ledger, q, opened)
    }

    #[test]
    fn second_submission_is_rejected_not_overwritten() {
        let (mut ledger, _, opened) = open_ledger();
        ledger.submit("q1", "alice", 1, 100, opened).unwrap();

        let err = ledger.submit("q1", "alice", 2, 50, opened).unwrap_err();
        assert!(matches!(err, BattleError::DuplicateSubmission));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entry("q1", "alice").unwrap().selected_index, 1);
    }

    #[test]
    fn submissions_for_other_questions_are_closed() {
        let (mut ledger, _, opened) = open_ledger();
        assert!(matches!(
            ledger.submit("q2", "alice", 1, 0, opened),
            Err(BattleError::QuestionWindowClosed)
        ));

        ledger.close();
        assert!(matches!(
            ledger.submit("q1", "alice", 1, 0, opened),
            Err(BattleError::QuestionWindowClosed)
        ));
    }

    #[test]
    fn submissions_after_the_deadline_are_closed() {
        let (mut ledger, _, opened) = open_ledger();
        let late = opened + Duration::from_millis(10_001);
        assert!(matches!(
            ledger.submit("q1", "alice", 1, 0, late),
            Err(BattleError::QuestionWindowClosed)
        ));
    }

    #[test]
    fn out_of_range_selection_is_rejected() {
        let (mut ledger, _, opened) = open_ledger();
        assert!(matches!(
            ledger.submit("q1", "alice", 4, 0, opened),
            Err(BattleError::InvalidSelection(4))
        ));
        assert!(ledger.is_empty());
    }

    #[test]
    fn offsets_are_clamped_to_the_time_limit() {
        let (mut ledger, _, opened) = open_ledger();
        let entry = ledger.submit("q1", "alice", 1, 60_000, opened).unwrap();
        assert_eq!(entry.submitted_at_offset_ms, 10_000);
    }

    #[test]
    fn timeouts_match_an_explicit_decline() {
        let (mut ledger, q, opened) = open_ledger();
        let declined = ledger.submit("q1", "bob", NO_ANSWER, 10_000, opened).unwrap();
        let filled = ledger.fill_timeouts(&q, ["alice", "bob"]);

        assert_eq!(filled.len(), 1);
        let timed_out = &filled[0];
        assert_eq!(timed_out.selected_index, declined.selected_index);
        assert_eq!(timed_out.submitted_at_offset_ms, declined.submitted_at_offset_ms);

        let scored = ledger.score_pending(&q);
        assert!(scored.iter().all(|(_, breakdown)| breakdown.points == 0));
    }

    #[test]
    fn entries_are_scored_exactly_once() {
        let (mut ledger, q, opened) = open_ledger();
        ledger.submit("q1", "alice", 1, 0, opened).unwrap();

        let first = ledger.score_pending(&q);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].1.points, 15);
        assert!(ledger.entry("q1", "alice").unwrap().scored);
        assert!(ledger.score_pending(&q).is_empty());
    }
}
