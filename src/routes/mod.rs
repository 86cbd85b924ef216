use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod polls;
pub mod sse;
pub mod votes;
pub mod websocket;

/// Compose all route trees and documentation routes, then attach the shared state.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(polls::router())
        .merge(votes::router())
        .merge(sse::router())
        .merge(websocket::router())
        .merge(docs::router());

    api_router.with_state(state)
}
