//! Explicit actor context passed to every operation.

use uuid::Uuid;

use crate::{dao::models::SessionEntity, error::ServiceError};

/// The host performing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostContext {
    /// Identity presented by the caller.
    pub host_id: Uuid,
    /// Whether the host may act on sessions it does not own.
    pub admin: bool,
}

impl HostContext {
    /// Context for a regular host.
    pub fn new(host_id: Uuid) -> Self {
        Self {
            host_id,
            admin: false,
        }
    }

    /// Refuse to mutate sessions owned by someone else.
    pub fn ensure_owner(&self, session: &SessionEntity) -> Result<(), ServiceError> {
        if self.admin || session.host_id == self.host_id {
            Ok(())
        } else {
            Err(ServiceError::AccessDenied(format!(
                "host `{}` does not own session `{}`",
                self.host_id, session.id
            )))
        }
    }
}

/// Client metadata collected when a player joins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinContext {
    /// Network address of the caller.
    pub address: Option<String>,
    /// Client-computed device fingerprint.
    pub fingerprint: Option<String>,
}
