use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{
    AnswerEntity, ParticipantEntity, PhaseEntity, QuestionEntity, RoomEntity, RoomStatusEntity,
    StandingEntity, StandingsEntity,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    id: String,
    host_id: String,
    max_participants: u8,
    status: RoomStatusEntity,
    phase: PhaseEntity,
    version: u64,
    questions: Vec<QuestionEntity>,
    current_question_index: u32,
    participants: Vec<ParticipantEntity>,
    #[serde(default)]
    answers: Vec<AnswerEntity>,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<RoomEntity> for MongoRoomDocument {
    fn from(value: RoomEntity) -> Self {
        Self {
            id: value.id.to_string(),
            host_id: value.host_id,
            max_participants: value.max_participants,
            status: value.status,
            phase: value.phase,
            version: value.version,
            questions: value.questions,
            current_question_index: value.current_question_index,
            participants: value.participants,
            answers: value.answers,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoRoomDocument> for RoomEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoRoomDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(&value.id)?,
            host_id: value.host_id,
            max_participants: value.max_participants,
            status: value.status,
            phase: value.phase,
            version: value.version,
            questions: value.questions,
            current_question_index: value.current_question_index,
            participants: value.participants,
            answers: value.answers,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoStandingsDocument {
    #[serde(rename = "_id")]
    room_id: String,
    standings: Vec<StandingEntity>,
    completed_at: DateTime,
}

impl From<StandingsEntity> for MongoStandingsDocument {
    fn from(value: StandingsEntity) -> Self {
        Self {
            room_id: value.room_id.to_string(),
            standings: value.standings,
            completed_at: DateTime::from_system_time(value.completed_at),
        }
    }
}

impl TryFrom<MongoStandingsDocument> for StandingsEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoStandingsDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            room_id: parse_id(&value.room_id)?,
            standings: value.standings,
            completed_at: value.completed_at.to_system_time(),
        })
    }
}

fn parse_id(raw: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(raw).map_err(|source| MongoDaoError::MalformedId {
        id: raw.to_owned(),
        source,
    })
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

pub fn active_filter() -> Document {
    let statuses: Vec<&str> = RoomStatusEntity::ACTIVE
        .iter()
        .map(|status| status.as_str())
        .collect();
    doc! {"status": {"$in": statuses}}
}
