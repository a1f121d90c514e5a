use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{BattleError, ServiceError},
    services::events::broadcast_answer_accepted,
    state::{SharedState, ledger::AnswerEntry, state_machine::RoundPhase},
};

/// Record an answer for the open question.
///
/// The stored offset is the client's measurement bounded by the server-observed elapsed
/// time; it only feeds the speed bonus and never extends the deadline.
pub async fn submit_answer(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
    question_id: &str,
    selected_index: i8,
    client_offset_ms: Option<u64>,
) -> Result<AnswerEntry, ServiceError> {
    let handle = state.room(room_id)?;
    let mut runtime = handle.lock().await;

    if !runtime.room.participants.contains_key(user_id) {
        return Err(BattleError::UnknownParticipant(user_id.to_string()).into());
    }
    let RoundPhase::Question(index) = runtime.machine.phase() else {
        return Err(BattleError::QuestionWindowClosed.into());
    };

    let now = Instant::now();
    let elapsed = runtime.ledger.elapsed_ms(now).unwrap_or_default();
    let allowance = state.config().timing().latency_allowance.as_millis() as u64;
    let offset = effective_offset(client_offset_ms, elapsed, allowance);

    let entry = runtime
        .ledger
        .submit(question_id, user_id, selected_index, offset, now)?;

    info!(
        room_id = %room_id,
        user_id = %user_id,
        question_index = index,
        offset_ms = entry.submitted_at_offset_ms,
        "answer recorded"
    );
    state.persist_room(&runtime).await;
    broadcast_answer_accepted(state, &runtime, user_id, question_id);

    if runtime.all_connected_answered(index) {
        handle.notify_all_answered(index);
    }
    Ok(entry)
}

/// Offset used for scoring: the client value may undercut the server-observed elapsed
/// time by at most `allowance_ms` and never exceed it.
pub fn effective_offset(client_offset_ms: Option<u64>, elapsed_ms: u64, allowance_ms: u64) -> u64 {
    match client_offset_ms {
        Some(client) => client
            .max(elapsed_ms.saturating_sub(allowance_ms))
            .min(elapsed_ms),
        None => elapsed_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_elapsed_is_used_without_a_client_value() {
        assert_eq!(effective_offset(None, 1_234, 500), 1_234);
    }

    #[test]
    fn client_value_is_trusted_within_the_allowance() {
        assert_eq!(effective_offset(Some(1_000), 1_300, 500), 1_000);
    }

    #[test]
    fn client_value_cannot_undercut_beyond_the_allowance() {
        assert_eq!(effective_offset(Some(0), 5_000, 500), 4_500);
    }

    #[test]
    fn client_value_cannot_exceed_the_server_clock() {
        assert_eq!(effective_offset(Some(9_000), 5_000, 500), 5_000);
    }
}
