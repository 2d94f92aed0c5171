//! Hard input limits. Everything user-supplied is bounded before it touches
//! engine state; violations surface as `EngineError::LimitExceeded`.

pub const MAX_VENUES: usize = 10_000;
pub const MAX_PROVIDERS_PER_VENUE: usize = 1_024;
pub const MAX_SHIFTS_PER_PROVIDER: usize = 4_096;
pub const MAX_BREAKS_PER_SHIFT: usize = 16;
pub const MAX_RESERVATIONS_PER_OWNER: usize = 65_536;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ACTOR_LEN: usize = 128;
pub const MAX_NOTE_LEN: usize = 1_024;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Timestamps must fall in [1970-01-01, 2100-01-01).
pub const MIN_VALID_TIMESTAMP_MS: i64 = 0;
pub const MAX_VALID_TIMESTAMP_MS: i64 = 4_102_444_800_000;

/// A single shift or reservation never spans more than 7 days.
pub const MAX_SPAN_DURATION_MS: i64 = 7 * 24 * 3_600_000;

/// Availability/calendar queries are capped at ~3 months.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 92;
