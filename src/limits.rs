use crate::model::Ms;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single booking may not span more than a year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
/// Widest window accepted by the free-span query.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;
pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 4_096;

/// Largest encoded WAL record: a full batch of bookings at maximal field lengths.
pub const MAX_WAL_ENTRY_LEN: usize = MAX_BATCH_SIZE * (MAX_NAME_LEN + MAX_TEXT_LEN + 64) + 64;
