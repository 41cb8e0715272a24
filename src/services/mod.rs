/// Heuristics refusing suspicious self-paced joins.
pub mod abuse_guard;
/// Per-session event subscriptions and their SSE rendering.
pub mod channel_service;
/// Host-driven session state machine with countdowns and live tally.
pub mod controller;
/// OpenAPI documentation generation.
pub mod documentation;
/// CSV report of a finished session.
pub mod export;
/// Health check service.
pub mod health_service;
/// Host-facing session lifecycle operations.
pub mod host_service;
/// Player-side client following a live session.
pub mod participant;
/// Joining, answering and player views.
pub mod player_service;
/// Quiz authoring.
pub mod quiz_service;
/// Bounded exponential backoff for idempotent store calls.
pub mod retry;
/// Per-player progress through self-paced sessions.
pub mod self_paced;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
#[cfg(test)]
pub(crate) mod test_support;
