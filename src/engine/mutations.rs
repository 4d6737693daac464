use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_no_conflict, validate_booking_fields, validate_interval, validate_resource_fields,
};
use super::{Engine, EngineError, WalCommand};

/// A booking can move between resources while we wait for locks; retry this often.
const MAX_LOCK_ATTEMPTS: usize = 4;

impl Engine {
    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(
        &self,
        id: Option<Id>,
        fields: ResourceFields,
    ) -> Result<Resource, EngineError> {
        validate_resource_fields(&fields)?;
        let _catalog = self.catalog.lock().await;
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let id = Self::allocate_id(&self.next_resource_id, id)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists {
                entity: "resource",
                id,
            });
        }

        let resource = fields.into_resource(id);
        self.wal_append(&Event::resource_created(&resource)).await?;
        self.state.insert(
            id,
            Arc::new(RwLock::new(ResourceState::new(resource.clone()))),
        );
        debug!(resource_id = id, "created resource {:?}", resource.name);
        Ok(resource)
    }

    /// Changing `available` or `capacity` never touches existing bookings.
    pub async fn update_resource(
        &self,
        id: Id,
        patch: ResourcePatch,
    ) -> Result<Resource, EngineError> {
        let mut guard = self.lock_resource(id).await?;
        let mut fields = ResourceFields::from(&guard.resource);
        patch.apply(&mut fields);
        validate_resource_fields(&fields)?;

        let event = Event::ResourceUpdated {
            id,
            name: fields.name,
            description: fields.description,
            location: fields.location,
            capacity: fields.capacity,
            available: fields.available,
        };
        self.persist_and_apply(&mut [&mut *guard], &event).await?;
        Ok(guard.resource.clone())
    }

    /// Deletes the resource and every booking on it. `Ok(false)` if it did not exist.
    pub async fn delete_resource(&self, id: Id) -> Result<bool, EngineError> {
        let _catalog = self.catalog.lock().await;
        let guard = match self.lock_resource(id).await {
            Ok(guard) => guard,
            Err(EngineError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        self.wal_append(&Event::ResourceDeleted { id }).await?;
        self.state.remove(&id);
        for b in &guard.bookings {
            self.booking_to_resource.remove(&b.id);
        }
        info!(
            resource_id = id,
            "deleted resource with {} bookings",
            guard.bookings.len()
        );
        Ok(true)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// The booking gate runs interval, fields, resource, then conflict.
    pub async fn create_booking(
        &self,
        id: Option<Id>,
        new: NewBooking,
    ) -> Result<Booking, EngineError> {
        let span = validate_interval(new.start, new.end)?;
        validate_booking_fields(&new.booked_by, &new.purpose)?;

        let mut guard = self.lock_resource(new.resource_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }
        check_no_conflict(&guard, &span, None)?;

        let id = self.reserve_booking_id(id, new.resource_id)?;
        let booking = Booking {
            id,
            resource_id: new.resource_id,
            span,
            booked_by: new.booked_by,
            purpose: new.purpose,
        };
        let event = Event::booking_created(&booking);
        if let Err(e) = self.persist_and_apply(&mut [&mut *guard], &event).await {
            self.booking_to_resource.remove(&id);
            return Err(e);
        }
        debug!(
            booking_id = id,
            resource_id = booking.resource_id,
            "booked [{}, {})",
            span.start,
            span.end
        );
        Ok(booking)
    }

    /// Re-runs the gate on the merged candidate, excluding the booking itself.
    /// Moving to another resource locks both in ascending id order.
    pub async fn update_booking(&self, id: Id, patch: BookingPatch) -> Result<Booking, EngineError> {
        if let (Some(start), Some(end)) = (patch.start, patch.end) {
            validate_interval(start, end)?;
        }

        for _ in 0..MAX_LOCK_ATTEMPTS {
            let from = self
                .get_resource_for_booking(&id)
                .ok_or(EngineError::booking_not_found(id))?;

            // Validate against a snapshot first so a bad interval is reported
            // before any lock on the destination is taken.
            let Some(snapshot) = self.get_booking(id).await else {
                continue;
            };
            let candidate = patch.clone().merge(&snapshot);
            validate_interval(candidate.start, candidate.end)?;
            validate_booking_fields(&candidate.booked_by, &candidate.purpose)?;

            let to = candidate.resource_id;
            let mut guards = self.lock_resources(&[from, to]).await?;

            let Some(current) = guards
                .iter()
                .find(|g| g.id() == from)
                .and_then(|g| g.booking(id))
                .cloned()
            else {
                continue; // moved or deleted while we waited
            };
            let candidate = patch.clone().merge(&current);
            let span = validate_interval(candidate.start, candidate.end)?;
            validate_booking_fields(&candidate.booked_by, &candidate.purpose)?;

            let dest = guards
                .iter()
                .find(|g| g.id() == to)
                .ok_or(EngineError::resource_not_found(to))?;
            if to != from && dest.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many bookings on resource"));
            }
            check_no_conflict(dest, &span, Some(id))?;

            let event = Event::BookingUpdated {
                id,
                from_resource_id: from,
                resource_id: to,
                span,
                booked_by: candidate.booked_by.clone(),
                purpose: candidate.purpose.clone(),
            };
            let mut targets: Vec<&mut ResourceState> = guards.iter_mut().map(|g| &mut **g).collect();
            self.persist_and_apply(&mut targets, &event).await?;
            debug!(booking_id = id, from, to, "moved to [{}, {})", span.start, span.end);

            return Ok(Booking {
                id,
                resource_id: to,
                span,
                booked_by: candidate.booked_by,
                purpose: candidate.purpose,
            });
        }
        Err(EngineError::booking_not_found(id))
    }

    /// Unconditional; can never violate the non-overlap invariant.
    /// `Ok(false)` if the booking did not exist.
    pub async fn delete_booking(&self, id: Id) -> Result<bool, EngineError> {
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let Some(resource_id) = self.get_resource_for_booking(&id) else {
                return Ok(false);
            };
            let mut guard = match self.lock_resource(resource_id).await {
                Ok(guard) => guard,
                Err(EngineError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if guard.booking(id).is_none() {
                continue;
            }
            let event = Event::BookingDeleted { id, resource_id };
            self.persist_and_apply(&mut [&mut *guard], &event).await?;
            debug!(booking_id = id, resource_id, "deleted booking");
            return Ok(true);
        }
        Ok(false)
    }

    /// Atomically book multiple slots. All-or-nothing: if any booking fails the
    /// gate, against stored bookings or another row of the batch, none are
    /// committed. Rows may target different resources.
    pub async fn batch_create_bookings(
        &self,
        rows: Vec<(Option<Id>, NewBooking)>,
    ) -> Result<Vec<Booking>, EngineError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        if rows.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut spans = Vec::with_capacity(rows.len());
        for (_, new) in &rows {
            spans.push(validate_interval(new.start, new.end)?);
            validate_booking_fields(&new.booked_by, &new.purpose)?;
        }

        let resource_ids: Vec<Id> = rows.iter().map(|(_, b)| b.resource_id).collect();
        let mut guards = self.lock_resources(&resource_ids).await?;
        let slot: HashMap<Id, usize> = guards.iter().enumerate().map(|(i, g)| (g.id(), i)).collect();

        let mut reserved = Vec::with_capacity(rows.len());
        let outcome = self.check_batch(&rows, &spans, &guards, &slot, &mut reserved);
        if let Err(e) = outcome {
            for id in &reserved {
                self.booking_to_resource.remove(id);
            }
            return Err(e);
        }

        // Phase 2: every row validated. One WAL record, so the batch is durable
        // or absent as a whole; memory is touched only after it is.
        let created: Vec<Booking> = rows
            .into_iter()
            .zip(spans)
            .zip(reserved.iter().copied())
            .map(|(((_, new), span), id)| Booking {
                id,
                resource_id: new.resource_id,
                span,
                booked_by: new.booked_by,
                purpose: new.purpose,
            })
            .collect();
        let event = Event::BookingsCreated {
            bookings: created.clone(),
        };
        let mut states: Vec<&mut ResourceState> = guards.iter_mut().map(|g| &mut **g).collect();
        if let Err(e) = self.persist_and_apply(&mut states, &event).await {
            for id in &reserved {
                self.booking_to_resource.remove(id);
            }
            return Err(e);
        }
        debug!("batch booked {} slots", created.len());
        Ok(created)
    }

    /// Phase 1 of a batch: reserve ids, then check every row against stored
    /// bookings and against earlier rows on the same resource.
    fn check_batch(
        &self,
        rows: &[(Option<Id>, NewBooking)],
        spans: &[Span],
        guards: &[tokio::sync::OwnedRwLockWriteGuard<ResourceState>],
        slot: &HashMap<Id, usize>,
        reserved: &mut Vec<Id>,
    ) -> Result<(), EngineError> {
        for (requested, new) in rows {
            reserved.push(self.reserve_booking_id(*requested, new.resource_id)?);
        }

        let mut per_resource: HashMap<Id, usize> = HashMap::new();
        for (i, ((_, new), span)) in rows.iter().zip(spans).enumerate() {
            let guard = &guards[slot[&new.resource_id]];
            let count = per_resource.entry(new.resource_id).or_default();
            *count += 1;
            if guard.bookings.len() + *count > MAX_BOOKINGS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many bookings on resource"));
            }
            check_no_conflict(guard, span, None)?;

            for j in 0..i {
                if rows[j].1.resource_id == new.resource_id && spans[j].overlaps(span) {
                    return Err(EngineError::Conflict {
                        resource_id: new.resource_id,
                        booking_id: reserved[j],
                    });
                }
            }
        }
        Ok(())
    }

    /// Claim a booking id in the reverse index so concurrent explicit ids cannot collide.
    fn reserve_booking_id(&self, requested: Option<Id>, resource_id: Id) -> Result<Id, EngineError> {
        let id = Self::allocate_id(&self.next_booking_id, requested)?;
        match self.booking_to_resource.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists {
                entity: "booking",
                id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(resource_id);
                Ok(id)
            }
        }
    }
}

// ── WAL maintenance ──────────────────────────────────────────

impl Engine {
    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// Holds the catalog lock and a read lock on every resource until the
    /// writer has swapped files, so no mutation can slip between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut shared: Vec<(Id, super::SharedResourceState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        shared.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(shared.len());
        for (_, rs) in shared {
            guards.push(rs.read_owned().await);
        }
        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::resource_created(&guard.resource));
            events.extend(guard.bookings.iter().map(Event::booking_created));
        }
        events.push(Event::IdCounters {
            next_resource_id: self.next_resource_id.load(Ordering::Relaxed),
            next_booking_id: self.next_booking_id.load(Ordering::Relaxed),
        });

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
