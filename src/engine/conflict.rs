use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// First booking on `rs` that overlaps `candidate`, skipping `exclude`.
///
/// Never fails and never validates its input: an inverted or empty candidate
/// is answered by the same half-open rule as any other.
pub fn find_conflict<'a>(
    rs: &'a ResourceState,
    candidate: &Span,
    exclude: Option<Id>,
) -> Option<&'a Booking> {
    rs.overlapping(candidate)
        .filter(|b| Some(b.id) != exclude)
        .find(|b| b.span.overlaps(candidate))
}

pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    span: &Span,
    exclude: Option<Id>,
) -> Result<(), EngineError> {
    match find_conflict(rs, span, exclude) {
        Some(existing) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::debug!(
                resource_id = rs.id(),
                booking_id = existing.id,
                "rejected [{}, {}): overlaps [{}, {})",
                span.start,
                span.end,
                existing.span.start,
                existing.span.end
            );
            Err(EngineError::Conflict {
                resource_id: rs.id(),
                booking_id: existing.id,
            })
        }
        None => Ok(()),
    }
}

/// Step one of the booking gate. Runs before any store access.
pub(crate) fn validate_interval(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidInterval { start, end });
    }
    let span = Span::new(start, end);
    validate_span(&span)?;
    Ok(span)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_booking_fields(booked_by: &str, purpose: &str) -> Result<(), EngineError> {
    if booked_by.trim().is_empty() {
        return Err(EngineError::Invalid("booked_by must not be empty"));
    }
    if booked_by.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("booked_by too long"));
    }
    if purpose.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    Ok(())
}

pub(crate) fn validate_resource_fields(fields: &ResourceFields) -> Result<(), EngineError> {
    if fields.name.trim().is_empty() {
        return Err(EngineError::Invalid("resource name must not be empty"));
    }
    if fields.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    if fields.capacity == 0 {
        return Err(EngineError::Invalid("capacity must be positive"));
    }
    if fields.location.len() > MAX_TEXT_LEN
        || fields.description.as_ref().is_some_and(|d| d.len() > MAX_TEXT_LEN)
    {
        return Err(EngineError::LimitExceeded("resource text too long"));
    }
    Ok(())
}

pub(crate) fn validate_id(id: Id) -> Result<(), EngineError> {
    if id <= 0 || id == Id::MAX {
        return Err(EngineError::Invalid("id out of range"));
    }
    Ok(())
}
