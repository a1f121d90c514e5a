use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::dto::{
    events::EventEnvelope,
    room::RoomSnapshot,
    validation::{validate_display_name, validate_user_id},
};

/// Failure to decode an inbound frame.
#[derive(Debug, Error)]
pub enum InboundError {
    /// Not JSON, or not one of the known message shapes.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Well-formed but failing field validation.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// Identity a player presents as the first frame of a socket.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct Identification {
    pub room_id: Uuid,
    #[validate(custom(function = "validate_user_id"))]
    pub user_id: String,
    #[validate(
        length(min = 1, max = 32),
        custom(function = "validate_display_name")
    )]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerInboundMessage {
    /// Must be the first frame; joins the room or reclaims an existing seat.
    Identification(Identification),
    /// Toggle readiness in the lobby.
    SetReady { ready: bool },
    /// Answer the open question; `selected_index` -1 declines.
    SubmitAnswer {
        question_id: String,
        selected_index: i8,
        /// Client-measured milliseconds since the question was shown.
        #[serde(default)]
        client_offset_ms: Option<u64>,
    },
    /// Host-only: end the current reveal early.
    HostAdvance,
    /// Release the seat before the battle starts.
    Leave,
    /// Any unrecognized `type`.
    #[serde(other)]
    Unknown,
}

impl PlayerInboundMessage {
    /// Parse a text frame and validate the identification payload.
    pub fn from_json_str(raw: &str) -> Result<Self, InboundError> {
        let message: Self = serde_json::from_str(raw)?;
        if let Self::Identification(identification) = &message {
            identification.validate()?;
        }
        Ok(message)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Messages pushed to player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerOutboundMessage {
    /// Sent after a successful identification.
    Joined {
        user_id: String,
        reconnected: bool,
        snapshot: RoomSnapshot,
    },
    /// A command from this client was refused.
    Error { code: String, message: String },
    /// A battle event of the player's room.
    Event(EventEnvelope),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identification_and_validates_it() {
        let room_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"identification","room_id":"{room_id}","user_id":"alice","display_name":"Alice"}}"#
        );
        let message = PlayerInboundMessage::from_json_str(&raw).unwrap();
        assert!(matches!(
            message,
            PlayerInboundMessage::Identification(Identification { ref user_id, .. }) if user_id == "alice"
        ));

        let bad = format!(
            r#"{{"type":"identification","room_id":"{room_id}","user_id":"a b","display_name":"A"}}"#
        );
        assert!(matches!(
            PlayerInboundMessage::from_json_str(&bad),
            Err(InboundError::Invalid(_))
        ));
    }

    #[test]
    fn parses_commands() {
        let message = PlayerInboundMessage::from_json_str(
            r#"{"type":"submit_answer","question_id":"q1","selected_index":2}"#,
        )
        .unwrap();
        assert!(matches!(
            message,
            PlayerInboundMessage::SubmitAnswer {
                selected_index: 2,
                client_offset_ms: None,
                ..
            }
        ));
        assert!(matches!(
            PlayerInboundMessage::from_json_str(r#"{"type":"host_advance"}"#).unwrap(),
            PlayerInboundMessage::HostAdvance
        ));
        assert!(matches!(
            PlayerInboundMessage::from_json_str(r#"{"type":"dance"}"#).unwrap(),
            PlayerInboundMessage::Unknown
        ));
    }

    #[test]
    fn error_messages_are_tagged() {
        let json = serde_json::to_value(PlayerOutboundMessage::Error {
            code: "room_full".into(),
            message: "room is full".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "room_full");
    }
}
