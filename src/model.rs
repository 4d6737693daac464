use serde::{Deserialize, Serialize};

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Store-assigned identity for resources and bookings.
pub type Id = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// The conflict rule. Abutting spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub location: String,
    /// Seats, passengers, etc. Never permits concurrent bookings.
    pub capacity: u32,
    /// Whether the resource is offered for booking at all.
    pub available: bool,
}

/// Everything about a resource except its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFields {
    pub name: String,
    pub description: Option<String>,
    pub location: String,
    pub capacity: u32,
    pub available: bool,
}

impl ResourceFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            location: String::new(),
            capacity: 1,
            available: true,
        }
    }

    pub fn into_resource(self, id: Id) -> Resource {
        Resource {
            id,
            name: self.name,
            description: self.description,
            location: self.location,
            capacity: self.capacity,
            available: self.available,
        }
    }
}

impl From<&Resource> for ResourceFields {
    fn from(r: &Resource) -> Self {
        Self {
            name: r.name.clone(),
            description: r.description.clone(),
            location: r.location.clone(),
            capacity: r.capacity,
            available: r.available,
        }
    }
}

/// Partial resource update. `None` leaves the field unchanged; `description: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub available: Option<bool>,
}

impl ResourcePatch {
    pub fn apply(self, fields: &mut ResourceFields) {
        if let Some(name) = self.name {
            fields.name = name;
        }
        if let Some(description) = self.description {
            fields.description = description;
        }
        if let Some(location) = self.location {
            fields.location = location;
        }
        if let Some(capacity) = self.capacity {
            fields.capacity = capacity;
        }
        if let Some(available) = self.available {
            fields.available = available;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Id,
    pub resource_id: Id,
    pub span: Span,
    pub booked_by: String,
    pub purpose: String,
}

/// A booking as proposed by a caller, before it has passed the gate.
/// `start`/`end` are raw so that an inverted interval can be reported as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub resource_id: Id,
    pub start: Ms,
    pub end: Ms,
    pub booked_by: String,
    pub purpose: String,
}

/// Partial booking update. Any change goes back through the conflict check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub resource_id: Option<Id>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub booked_by: Option<String>,
    pub purpose: Option<String>,
}

impl BookingPatch {
    /// Merge onto the stored booking, yielding the candidate to validate.
    pub fn merge(self, current: &Booking) -> NewBooking {
        NewBooking {
            resource_id: self.resource_id.unwrap_or(current.resource_id),
            start: self.start.unwrap_or(current.span.start),
            end: self.end.unwrap_or(current.span.end),
            booked_by: self.booked_by.unwrap_or_else(|| current.booked_by.clone()),
            purpose: self.purpose.unwrap_or_else(|| current.purpose.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    /// Bookings on this resource, sorted by `span.start`. Pairwise non-overlapping.
    pub bookings: Vec<Booking>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Id {
        self.resource.id
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Remove booking by id.
    pub fn remove_booking(&mut self, id: Id) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Id) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// One WAL record. Replay applies these in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Id,
        name: String,
        description: Option<String>,
        location: String,
        capacity: u32,
        available: bool,
    },
    ResourceUpdated {
        id: Id,
        name: String,
        description: Option<String>,
        location: String,
        capacity: u32,
        available: bool,
    },
    /// Cascades to every booking on the resource.
    ResourceDeleted {
        id: Id,
    },
    BookingCreated {
        id: Id,
        resource_id: Id,
        span: Span,
        booked_by: String,
        purpose: String,
    },
    BookingUpdated {
        id: Id,
        from_resource_id: Id,
        resource_id: Id,
        span: Span,
        booked_by: String,
        purpose: String,
    },
    BookingDeleted {
        id: Id,
        resource_id: Id,
    },
    /// An all-or-nothing batch, possibly spanning several resources.
    BookingsCreated {
        bookings: Vec<Booking>,
    },
    /// Id counters at compaction time, so ids of deleted entities stay retired.
    IdCounters {
        next_resource_id: Id,
        next_booking_id: Id,
    },
}

impl Event {
    pub fn resource_created(r: &Resource) -> Self {
        Event::ResourceCreated {
            id: r.id,
            name: r.name.clone(),
            description: r.description.clone(),
            location: r.location.clone(),
            capacity: r.capacity,
            available: r.available,
        }
    }

    pub fn booking_created(b: &Booking) -> Self {
        Event::BookingCreated {
            id: b.id,
            resource_id: b.resource_id,
            span: b.span,
            booked_by: b.booked_by.clone(),
            purpose: b.purpose.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn booking(id: Id, start: Ms, end: Ms) -> Booking {
        Booking {
            id,
            resource_id: 1,
            span: Span::new(start, end),
            booked_by: "ada".into(),
            purpose: String::new(),
        }
    }

    fn state() -> ResourceState {
        ResourceState::new(ResourceFields::named("Room A").into_resource(1))
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap_is_symmetric() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn abutting_spans_do_not_overlap_either_direction() {
        let a = Span::new(10 * H, 11 * H);
        let b = Span::new(11 * H, 12 * H);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn one_instant_overlap_at_each_boundary() {
        let a = Span::new(10 * H, 11 * H);
        // candidate starts one minute before a ends
        assert!(Span::new(10 * H + 59 * M, 12 * H).overlaps(&a));
        // candidate ends one minute after a starts
        assert!(Span::new(9 * H, 10 * H + M).overlaps(&a));
        // single millisecond on either side
        assert!(Span::new(11 * H - 1, 12 * H).overlaps(&a));
        assert!(Span::new(9 * H, 10 * H + 1).overlaps(&a));
    }

    #[test]
    fn enclosure_overlaps_both_ways() {
        let inner = Span::new(10 * H, 11 * H);
        let outer = Span::new(9 * H, 12 * H);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
        assert!(inner.overlaps(&inner));
    }

    #[test]
    fn booking_ordering() {
        let mut rs = state();
        rs.insert_booking(booking(1, 300, 400));
        rs.insert_booking(booking(2, 100, 200));
        rs.insert_booking(booking(3, 200, 300));
        let starts: Vec<Ms> = rs.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn remove_booking_by_id() {
        let mut rs = state();
        rs.insert_booking(booking(1, 100, 200));
        rs.insert_booking(booking(2, 200, 300));
        assert_eq!(rs.remove_booking(1).map(|b| b.id), Some(1));
        assert!(rs.remove_booking(1).is_none());
        assert_eq!(rs.bookings.len(), 1);
        assert_eq!(rs.bookings[0].id, 2);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = state();
        rs.insert_booking(booking(1, 100, 200));
        rs.insert_booking(booking(2, 450, 600));
        rs.insert_booking(booking(3, 1000, 1100));

        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = state();
        rs.insert_booking(booking(1, 100, 200));
        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(rs.overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn overlapping_empty_resource() {
        let rs = state();
        assert_eq!(rs.overlapping(&Span::new(0, 1000)).count(), 0);
    }

    #[test]
    fn resource_patch_only_touches_given_fields() {
        let mut fields = ResourceFields {
            name: "Van".into(),
            description: Some("blue".into()),
            location: "Depot".into(),
            capacity: 8,
            available: true,
        };
        ResourcePatch {
            description: Some(None),
            available: Some(false),
            ..Default::default()
        }
        .apply(&mut fields);
        assert_eq!(fields.name, "Van");
        assert_eq!(fields.description, None);
        assert_eq!(fields.location, "Depot");
        assert_eq!(fields.capacity, 8);
        assert!(!fields.available);
    }

    #[test]
    fn booking_patch_merges_onto_current() {
        let current = booking(5, 10 * H, 11 * H);
        let merged = BookingPatch {
            start: Some(10 * H + 30 * M),
            end: Some(11 * H + 30 * M),
            ..Default::default()
        }
        .merge(&current);
        assert_eq!(merged.resource_id, 1);
        assert_eq!((merged.start, merged.end), (10 * H + 30 * M, 11 * H + 30 * M));
        assert_eq!(merged.booked_by, "ada");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingUpdated {
            id: 9,
            from_resource_id: 1,
            resource_id: 2,
            span: Span::new(0, 10),
            booked_by: "grace".into(),
            purpose: "standup".into(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
