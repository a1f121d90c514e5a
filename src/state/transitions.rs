use tokio::time::Instant;
use tracing::info;

use crate::{
    error::{BattleError, ServiceError},
    services::events::{broadcast_phase_changed, broadcast_room_state},
    state::{
        SharedState,
        battle::RoomRuntime,
        state_machine::{RoundEvent, RoundPhase},
    },
};

/// Execute a compare-and-swap transition on a locked room, persist the committed record,
/// then broadcast the resulting phase change.
///
/// The caller holds the room lock for the whole call so the durable write and the
/// emitted events follow the commit order.
pub async fn run_transition_with_broadcast<T>(
    state: &SharedState,
    runtime: &mut RoomRuntime,
    expected: &RoundPhase,
    event: RoundEvent,
    work: impl FnOnce(&mut RoomRuntime) -> Result<T, BattleError>,
) -> Result<(T, RoundPhase), ServiceError> {
    let status_before = runtime.room.status;
    let (value, next) = runtime.run_transition(expected, event.clone(), work)?;

    info!(
        room_id = %runtime.room.id,
        from = ?expected,
        to = ?next,
        event = ?event,
        version = runtime.machine.version(),
        "phase transition committed"
    );

    state.persist_room(runtime).await;
    if runtime.room.status != status_before {
        broadcast_room_state(state, runtime);
    }
    broadcast_phase_changed(state, runtime, Instant::now());
    Ok((value, next))
}
