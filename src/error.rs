use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{
    dao::{questions::ProviderError, storage::StorageError},
    state::{ApplyError, PlanError},
};

/// Domain errors raised by a single battle room.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BattleError {
    /// Room creation parameters are unusable; nothing was created.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// No room with this identifier is live or stored.
    #[error("room `{0}` not found")]
    RoomNotFound(Uuid),
    /// The roster is at capacity.
    #[error("room is full")]
    RoomFull,
    /// The room left the lobby; the roster is locked.
    #[error("room already started")]
    RoomAlreadyStarted,
    /// The user already holds a seat.
    #[error("participant `{0}` already joined")]
    DuplicateParticipant(String),
    /// The user holds no seat in this room.
    #[error("unknown participant `{0}`")]
    UnknownParticipant(String),
    /// The question is not the active one or its window already closed.
    #[error("question window closed")]
    QuestionWindowClosed,
    /// An answer for this (question, participant) is already recorded.
    #[error("answer already submitted")]
    DuplicateSubmission,
    /// Selected option outside `-1..=3`.
    #[error("selected index {0} is out of range")]
    InvalidSelection(i8),
    /// Host-only command issued by another participant.
    #[error("only the host can do this")]
    NotHost,
    /// Lost race between two triggers of the same transition.
    #[error("stale transition: {0}")]
    StaleTransition(String),
}

impl BattleError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            BattleError::InvalidConfiguration(_) => "invalid_configuration",
            BattleError::RoomNotFound(_) => "room_not_found",
            BattleError::RoomFull => "room_full",
            BattleError::RoomAlreadyStarted => "room_already_started",
            BattleError::DuplicateParticipant(_) => "duplicate_participant",
            BattleError::UnknownParticipant(_) => "unknown_participant",
            BattleError::QuestionWindowClosed => "question_window_closed",
            BattleError::DuplicateSubmission => "duplicate_submission",
            BattleError::InvalidSelection(_) => "invalid_selection",
            BattleError::NotHost => "not_host",
            BattleError::StaleTransition(_) => "stale_transition",
        }
    }

    /// Concurrency errors stay internal and are never reported to clients.
    pub fn is_client_visible(&self) -> bool {
        !matches!(self, BattleError::StaleTransition(_))
    }

    /// Errors a client should present as "cannot join".
    pub fn is_join_refusal(&self) -> bool {
        matches!(self, BattleError::RoomFull | BattleError::RoomAlreadyStarted)
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Domain rule violated inside one room.
    #[error(transparent)]
    Battle(#[from] BattleError),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// True when the error is a lost transition race that must be discarded silently.
    pub fn is_stale(&self) -> bool {
        matches!(self, ServiceError::Battle(BattleError::StaleTransition(_)))
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UnknownSet(name) => {
                ServiceError::NotFound(format!("question set `{name}` not found"))
            }
            ProviderError::Empty(name) => ServiceError::Battle(BattleError::InvalidConfiguration(
                format!("question set `{name}` is empty"),
            )),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Battle(battle) => match battle {
                BattleError::InvalidConfiguration(_) | BattleError::InvalidSelection(_) => {
                    AppError::BadRequest(battle.to_string())
                }
                BattleError::RoomNotFound(_) | BattleError::UnknownParticipant(_) => {
                    AppError::NotFound(battle.to_string())
                }
                other => AppError::Conflict(other.to_string()),
            },
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("state transition already pending".into())
            }
            PlanError::Stale { expected, actual } => ServiceError::Battle(
                BattleError::StaleTransition(format!("expected {expected:?}, found {actual:?}")),
            ),
            PlanError::InvalidTransition(invalid) => {
                ServiceError::Battle(BattleError::StaleTransition(invalid.to_string()))
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "state changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "state version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::RoundPhase;

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn lost_races_map_to_stale_transitions() {
        let err: ServiceError = PlanError::Stale {
            expected: RoundPhase::Question(0),
            actual: RoundPhase::Reveal(0),
        }
        .into();
        assert!(err.is_stale());
        assert_eq!(status_of(err), StatusCode::CONFLICT);
    }

    #[test]
    fn service_errors_map_to_http_statuses() {
        assert_eq!(
            status_of(BattleError::InvalidConfiguration("5 seats".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(BattleError::RoomNotFound(Uuid::nil()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ServiceError::InvalidState("battle still running".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ServiceError::Unavailable(StorageError::unavailable(
                "down".to_string(),
                std::io::Error::other("refused"),
            ))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
