mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{free_spans, merge_overlapping, subtract_intervals};
pub use conflict::find_conflict;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};

use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before compaction or stats see the log.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes never leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The booking store. One `RwLock` per resource is the serialization point for
/// check-then-write on that resource.
pub struct Engine {
    pub(super) state: DashMap<Id, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → resource id.
    pub(super) booking_to_resource: DashMap<Id, Id>,
    /// Serializes resource create/delete so explicit ids cannot race.
    pub(super) catalog: Mutex<()>,
    pub(super) next_resource_id: AtomicI64,
    pub(super) next_booking_id: AtomicI64,
}

/// Apply an event directly to a ResourceState (caller holds the lock).
///
/// A booking moved between resources is applied once to each side: the source
/// drops it, the destination inserts it.
fn apply_to_resource(rs: &mut ResourceState, event: &Event, index: &DashMap<Id, Id>) {
    match event {
        Event::ResourceUpdated {
            name,
            description,
            location,
            capacity,
            available,
            ..
        } => {
            rs.resource.name = name.clone();
            rs.resource.description = description.clone();
            rs.resource.location = location.clone();
            rs.resource.capacity = *capacity;
            rs.resource.available = *available;
        }
        Event::BookingCreated {
            id,
            resource_id,
            span,
            booked_by,
            purpose,
        } => {
            rs.insert_booking(Booking {
                id: *id,
                resource_id: *resource_id,
                span: *span,
                booked_by: booked_by.clone(),
                purpose: purpose.clone(),
            });
            index.insert(*id, *resource_id);
        }
        Event::BookingUpdated {
            id,
            from_resource_id,
            resource_id,
            span,
            booked_by,
            purpose,
        } => {
            if rs.id() == *from_resource_id {
                rs.remove_booking(*id);
            }
            if rs.id() == *resource_id {
                rs.insert_booking(Booking {
                    id: *id,
                    resource_id: *resource_id,
                    span: *span,
                    booked_by: booked_by.clone(),
                    purpose: purpose.clone(),
                });
                index.insert(*id, *resource_id);
            }
        }
        Event::BookingDeleted { id, .. } => {
            rs.remove_booking(*id);
            index.remove(id);
        }
        Event::BookingsCreated { bookings } => {
            let rs_id = rs.id();
            for booking in bookings.iter().filter(|b| b.resource_id == rs_id) {
                rs.insert_booking(booking.clone());
                index.insert(booking.id, booking.resource_id);
            }
        }
        // Handled at the DashMap or counter level, not here
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } | Event::IdCounters { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            booking_to_resource: DashMap::new(),
            catalog: Mutex::new(()),
            next_resource_id: AtomicI64::new(1),
            next_booking_id: AtomicI64::new(1),
        };

        // Sole owner of these Arcs during replay: try_read/try_write cannot fail.
        // blocking_* would panic inside the runtime.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {} WAL events: {} resources, {} bookings",
            events.len(),
            engine.state.len(),
            engine.booking_to_resource.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ResourceCreated {
                id,
                name,
                description,
                location,
                capacity,
                available,
            } => {
                let resource = Resource {
                    id: *id,
                    name: name.clone(),
                    description: description.clone(),
                    location: location.clone(),
                    capacity: *capacity,
                    available: *available,
                };
                self.state
                    .insert(*id, Arc::new(RwLock::new(ResourceState::new(resource))));
                self.next_resource_id.fetch_max(id + 1, Ordering::Relaxed);
            }
            Event::ResourceDeleted { id } => {
                if let Some((_, rs)) = self.state.remove(id)
                    && let Ok(guard) = rs.try_read()
                {
                    for b in &guard.bookings {
                        self.booking_to_resource.remove(&b.id);
                    }
                }
            }
            Event::BookingUpdated {
                id,
                from_resource_id,
                resource_id,
                ..
            } => {
                for rid in [*from_resource_id, *resource_id] {
                    self.replay_on(rid, event);
                    if from_resource_id == resource_id {
                        break;
                    }
                }
                self.next_booking_id.fetch_max(id + 1, Ordering::Relaxed);
            }
            Event::BookingCreated {
                id, resource_id, ..
            } => {
                self.replay_on(*resource_id, event);
                self.next_booking_id.fetch_max(id + 1, Ordering::Relaxed);
            }
            Event::BookingsCreated { bookings } => {
                let mut resource_ids: Vec<Id> = bookings.iter().map(|b| b.resource_id).collect();
                resource_ids.sort_unstable();
                resource_ids.dedup();
                for rid in resource_ids {
                    self.replay_on(rid, event);
                }
                if let Some(max) = bookings.iter().map(|b| b.id).max() {
                    self.next_booking_id.fetch_max(max + 1, Ordering::Relaxed);
                }
            }
            Event::IdCounters {
                next_resource_id,
                next_booking_id,
            } => {
                self.next_resource_id.fetch_max(*next_resource_id, Ordering::Relaxed);
                self.next_booking_id.fetch_max(*next_booking_id, Ordering::Relaxed);
            }
            Event::BookingDeleted { resource_id, .. } | Event::ResourceUpdated { id: resource_id, .. } => {
                self.replay_on(*resource_id, event);
            }
        }
    }

    fn replay_on(&self, resource_id: Id, event: &Event) {
        let Some(rs) = self.get_resource(&resource_id) else {
            return;
        };
        if let Ok(mut guard) = rs.try_write() {
            apply_to_resource(&mut guard, event, &self.booking_to_resource);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// WAL-append + apply in one call. The caller holds the write lock of every
    /// resource in `guards`.
    pub(super) async fn persist_and_apply(
        &self,
        guards: &mut [&mut ResourceState],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        for rs in guards.iter_mut() {
            apply_to_resource(rs, event, &self.booking_to_resource);
        }
        Ok(())
    }

    pub fn get_resource(&self, id: &Id) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_booking(&self, booking_id: &Id) -> Option<Id> {
        self.booking_to_resource.get(booking_id).map(|e| *e.value())
    }

    /// Acquire the write lock of a live resource.
    ///
    /// Re-checks membership after the lock is granted: a concurrent delete
    /// removes the resource from the map while holding this same lock.
    pub(super) async fn lock_resource(
        &self,
        id: Id,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let rs = self
            .get_resource(&id)
            .ok_or(EngineError::resource_not_found(id))?;
        let guard = rs.clone().write_owned().await;
        let live = self
            .state
            .get(&id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), &rs));
        if !live {
            return Err(EngineError::resource_not_found(id));
        }
        Ok(guard)
    }

    /// Lock several resources in ascending id order to prevent deadlocks.
    /// Returned guards are in that same order; `ids` may contain duplicates.
    pub(super) async fn lock_resources(
        &self,
        ids: &[Id],
    ) -> Result<Vec<OwnedRwLockWriteGuard<ResourceState>>, EngineError> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.lock_resource(id).await?);
        }
        Ok(guards)
    }

    /// Use the caller's id, or hand out the next one from `counter`.
    pub(super) fn allocate_id(counter: &AtomicI64, requested: Option<Id>) -> Result<Id, EngineError> {
        match requested {
            Some(id) => {
                conflict::validate_id(id)?;
                counter.fetch_max(id + 1, Ordering::Relaxed);
                Ok(id)
            }
            None => Ok(counter.fetch_add(1, Ordering::Relaxed)),
        }
    }
}
