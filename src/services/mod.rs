/// Answer submission and offset clamping.
pub mod answer_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Battle event construction and fan-out.
pub mod events;
/// Health check service.
pub mod health_service;
/// Room lifecycle: creation, membership, readiness and connection tracking.
pub mod room_service;
/// Per-room driver racing timers against wake signals.
pub mod round_controller;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Storage connection supervisor with degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
