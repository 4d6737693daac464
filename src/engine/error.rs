use crate::model::{Id, Ms};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `end <= start`. Checked before the store is touched.
    #[error("invalid interval [{start}, {end}): end must be after start")]
    InvalidInterval { start: Ms, end: Ms },

    #[error("conflict on resource {resource_id} with booking {booking_id}")]
    Conflict { resource_id: Id, booking_id: Id },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Id },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: Id },

    #[error("invalid value: {0}")]
    Invalid(&'static str),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    Wal(String),
}

impl EngineError {
    pub(crate) fn resource_not_found(id: Id) -> Self {
        EngineError::NotFound {
            entity: "resource",
            id,
        }
    }

    pub(crate) fn booking_not_found(id: Id) -> Self {
        EngineError::NotFound {
            entity: "booking",
            id,
        }
    }
}
