use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Live Poll Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::polls::create_poll,
        crate::routes::polls::get_poll,
        crate::routes::polls::get_snapshot,
        crate::routes::votes::submit_vote,
        crate::routes::votes::submit_legacy_vote,
        crate::routes::sse::poll_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::poll::CreatePollRequest,
            crate::dto::poll::PollResponse,
            crate::dto::poll::PollSnapshot,
            crate::dto::poll::OptionTally,
            crate::dto::vote::VoteRequest,
            crate::dto::vote::LegacyVoteRequest,
            crate::dto::vote::VoteAcceptedResponse,
            crate::dto::sse::TallyEvent,
            crate::dto::ws::LiveOutboundMessage,
            crate::error::ErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "polls", description = "Poll creation and snapshots"),
        (name = "votes", description = "Vote submission"),
        (name = "live", description = "Live tally streams (SSE and WebSocket)"),
    )
)]
pub struct ApiDoc;
