use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the lobbyd agent.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::tickets::submit_ticket,
        crate::routes::tickets::ticket_status,
        crate::routes::tickets::cancel_ticket,
        crate::routes::rooms::room_state,
        crate::routes::rooms::shutdown_room,
        crate::routes::admin::overview,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::ticket::SubmitTicketRequest,
            crate::dto::ticket::SubmitTicketResponse,
            crate::dto::ticket::TicketStatusResponse,
            crate::dto::ticket::CancelTicketResponse,
            crate::dto::room::ShutdownRequest,
            crate::dto::room::ShutdownDetails,
            crate::dto::room::ShutdownAck,
            crate::dto::admin::AdminOverviewResponse,
            crate::store::models::Ticket,
            crate::store::models::TicketStatus,
            crate::store::models::RoomState,
            crate::store::models::RoomStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "tickets", description = "Join-ticket lifecycle"),
        (name = "rooms", description = "Room state and shutdown callbacks"),
        (name = "admin", description = "Operator snapshots"),
    )
)]
pub struct ApiDoc;
