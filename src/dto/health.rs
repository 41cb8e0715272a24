use serde::Serialize;
use utoipa::ToSchema;

/// Coarse availability of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Storage reachable.
    Ok,
    /// Storage unreachable; session operations answer 503.
    Degraded,
}

/// Body of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Overall service state.
    pub status: HealthStatus,
    /// Sessions driven by a controller in this process.
    pub active_sessions: usize,
}
