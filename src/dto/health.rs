use serde::Serialize;
use utoipa::ToSchema;

/// Body of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok` while votes are accepted, `degraded` while the poll store is unreachable.
    pub status: String,
    /// Polls that currently have at least one live viewer.
    pub live_polls: usize,
}

impl HealthResponse {
    /// Votes are being accepted.
    pub fn ok(live_polls: usize) -> Self {
        Self {
            status: "ok".to_string(),
            live_polls,
        }
    }

    /// Votes are refused until the poll store comes back; live feeds stay open.
    pub fn degraded(live_polls: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            live_polls,
        }
    }
}
