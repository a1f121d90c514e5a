use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage health and the number of live rooms, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.room_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        None => warn!("storage unavailable (degraded mode)"),
    }

    let live_rooms = state.rooms().len();
    if state.is_degraded() {
        HealthResponse::degraded(live_rooms)
    } else {
        HealthResponse::ok(live_rooms)
    }
}
