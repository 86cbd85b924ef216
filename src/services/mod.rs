/// Identity dedup guard backed by the vote ledger.
pub mod dedup_guard;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Voter identity derivation from request metadata.
pub mod identity;
/// Live poll feeds shared by the SSE and WebSocket channels.
pub mod live_feed;
/// Poll creation.
pub mod provisioning_service;
/// Background repair of pending ledger entries.
pub mod reconciler;
/// Bounded exponential backoff for storage calls.
pub mod retry;
/// Poll and snapshot read path.
pub mod snapshot_service;
/// Server-Sent Events streaming of poll updates.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Receipt-guarded tally operations.
pub mod tally;
#[cfg(test)]
pub(crate) mod testing;
/// Vote ingestion.
pub mod vote_service;
/// WebSocket streaming of poll updates.
pub mod websocket_service;
