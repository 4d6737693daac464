use crate::limits::*;
use crate::model::*;

use super::availability::free_spans;
use super::conflict::find_conflict;
use super::{Engine, EngineError, SharedResourceState};

impl Engine {
    /// The conflict query. Pure: no validation, no side effects.
    ///
    /// `false` for a resource that does not exist or has no bookings. An
    /// inverted `[start, end)` is answered by the same rule, never rejected.
    pub async fn check_conflict(
        &self,
        resource_id: Id,
        start: Ms,
        end: Ms,
        exclude_booking_id: Option<Id>,
    ) -> bool {
        let Some(rs) = self.get_resource(&resource_id) else {
            return false;
        };
        let guard = rs.read().await;
        let candidate = Span { start, end };
        find_conflict(&guard, &candidate, exclude_booking_id).is_some()
    }

    pub fn resource_exists(&self, id: Id) -> bool {
        self.state.contains_key(&id)
    }

    pub async fn get_resource_info(&self, id: Id) -> Option<Resource> {
        let rs = self.get_resource(&id)?;
        let guard = rs.read().await;
        Some(guard.resource.clone())
    }

    pub async fn list_resources(&self) -> Vec<Resource> {
        let mut resources = Vec::new();
        for rs in self.snapshot_states() {
            resources.push(rs.read().await.resource.clone());
        }
        resources.sort_by_key(|r| r.id);
        resources
    }

    pub async fn get_booking(&self, id: Id) -> Option<Booking> {
        let resource_id = self.get_resource_for_booking(&id)?;
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        guard.booking(id).cloned()
    }

    /// Bookings on one resource, ordered by start. Empty for an unknown resource.
    pub async fn list_bookings_for_resource(&self, resource_id: Id) -> Vec<Booking> {
        let Some(rs) = self.get_resource(&resource_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard.bookings.clone()
    }

    pub async fn list_bookings(&self) -> Vec<Booking> {
        let mut bookings = Vec::new();
        for rs in self.snapshot_states() {
            bookings.extend(rs.read().await.bookings.iter().cloned());
        }
        bookings.sort_by_key(|b| b.id);
        bookings
    }

    /// Unbooked gaps of `[start, end)` on a resource, shortest dropped by `min_duration_ms`.
    pub async fn free_spans(
        &self,
        resource_id: Id,
        start: Ms,
        end: Ms,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidInterval { start, end });
        }
        let window = Span::new(start, end);
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let Some(rs) = self.get_resource(&resource_id) else {
            return Ok(Vec::new());
        };
        let guard = rs.read().await;
        let mut free = free_spans(&guard, &window);
        if let Some(min_dur) = min_duration_ms {
            free.retain(|span| span.duration_ms() >= min_dur);
        }
        Ok(free)
    }

    /// Clone the per-resource handles out of the map so no shard lock is held across an await.
    fn snapshot_states(&self) -> Vec<SharedResourceState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }
}
