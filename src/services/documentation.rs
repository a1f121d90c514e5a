use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the quiz battle server.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::get_standings,
        crate::routes::sse::room_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::QuestionInput,
            crate::dto::room::RoomSnapshot,
            crate::dto::room::StandingsResponse,
            crate::dto::events::EventEnvelope,
            crate::dto::events::BattleEvent,
            crate::dto::ws::PlayerInboundMessage,
            crate::dto::ws::PlayerOutboundMessage,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Battle room lifecycle"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "players", description = "WebSocket command channel for players"),
    )
)]
pub struct ApiDoc;
