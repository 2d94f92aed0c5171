use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

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

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Widen by `buffer` on both sides, clamped at the epoch.
    pub fn expand(&self, buffer: Ms) -> Span {
        Span {
            start: (self.start - buffer).max(0),
            end: self.end + buffer,
        }
    }

    /// Clamp to the query window. Caller guarantees the spans overlap.
    pub fn clamp_to(&self, window: &Span) -> Span {
        Span::new(self.start.max(window.start), self.end.min(window.end))
    }
}

/// UTC day bounds for a calendar date.
pub fn day_bounds(date: NaiveDate) -> Span {
    let start = date
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
        .timestamp_millis();
    Span::new(start, start + DAY_MS)
}

pub fn date_of(at: Ms) -> Option<NaiveDate> {
    chrono::DateTime::from_timestamp_millis(at).map(|dt| dt.date_naive())
}

// ── Shifts ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakViolation {
    /// A break's start is not before its end.
    Malformed,
    /// A break does not nest inside the shift span.
    OutsideShift,
    /// Two breaks overlap each other.
    Overlapping,
}

/// Break sub-intervals of a shift, validated at construction: every break
/// nests inside the shift span, breaks are pairwise disjoint, stored sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BreakList(Vec<Span>);

impl BreakList {
    pub fn new(shift: &Span, raw: Vec<(Ms, Ms)>) -> Result<Self, BreakViolation> {
        let mut breaks = Vec::with_capacity(raw.len());
        for (start, end) in raw {
            if start >= end {
                return Err(BreakViolation::Malformed);
            }
            let b = Span::new(start, end);
            if !shift.contains_span(&b) {
                return Err(BreakViolation::OutsideShift);
            }
            breaks.push(b);
        }
        breaks.sort_by_key(|b| b.start);
        if breaks.windows(2).any(|w| w[0].end > w[1].start) {
            return Err(BreakViolation::Overlapping);
        }
        Ok(Self(breaks))
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn spans(&self) -> &[Span] {
        &self.0
    }

    pub fn intersects(&self, span: &Span) -> bool {
        self.0.iter().any(|b| b.overlaps(span))
    }
}

/// A provider's declared working window for one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub breaks: BreakList,
    pub status: ShiftStatus,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Declined,
    Cancelled,
    Completed,
    Expired,
}

impl ReservationStatus {
    /// Statuses that count toward overlap and capacity checks.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Declined | Self::Cancelled | Self::Completed | Self::Expired
        )
    }

    /// Legal successor table. `Expired` is reachable from any non-terminal
    /// status via the time-based sweep; terminal statuses have no successors.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Confirmed | Self::Declined | Self::Cancelled | Self::Expired
            ),
            Self::Confirmed => {
                matches!(next, Self::Cancelled | Self::Completed | Self::Expired)
            }
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "declined" => Some(Self::Declined),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CustomerContact {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Price/payment metadata. Opaque to the core: recorded, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceInfo {
    pub amount_minor: i64,
    pub currency: String,
    #[serde(default)]
    pub payment_ref: Option<String>,
}

/// One row per status transition, including the initial creation. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: ReservationStatus,
    pub at: Ms,
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub venue_id: Ulid,
    /// None for venue-level bookings, which count against room capacity
    /// instead of provider exclusivity.
    pub provider_id: Option<Ulid>,
    pub span: Span,
    /// Conflict buffer in ms, copied from venue/provider defaults at creation.
    pub buffer: Ms,
    pub status: ReservationStatus,
    pub idempotency_key: Option<String>,
    pub customer: CustomerContact,
    pub price: Option<PriceInfo>,
    pub history: Vec<StatusEvent>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// The window this reservation blocks for conflict purposes.
    pub fn blocked_span(&self) -> Span {
        self.span.expand(self.buffer)
    }
}

// ── Notification outbox ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKey {
    Email,
    Slack,
    Line,
    Log,
}

impl ChannelKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Slack => "slack",
            Self::Line => "line",
            Self::Log => "log",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "slack" => Some(Self::Slack),
            "line" => Some(Self::Line),
            "log" => Some(Self::Log),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// Append-only record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub outcome: AttemptOutcome,
    pub response_code: Option<u16>,
    pub error: Option<String>,
    pub at: Ms,
}

/// One outbox row per (reservation status change, channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub channel: ChannelKey,
    pub status: DeliveryStatus,
    pub payload: serde_json::Value,
    pub attempt_count: u32,
    pub next_attempt_at: Ms,
    pub last_attempt_at: Option<Ms>,
    pub last_error: Option<String>,
    pub attempts: Vec<Attempt>,
}

// ── Owner state ──────────────────────────────────────────────────

/// A venue: capacity/buffer registry entry plus its venue-level reservations.
/// Profile data (photos, menus, contact info) lives outside this core.
#[derive(Debug, Clone)]
pub struct VenueState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Max concurrently overlapping venue-level reservations ("room count").
    pub room_count: u32,
    /// Default conflict buffer for new reservations, in ms.
    pub default_buffer: Ms,
    pub providers: Vec<Ulid>,
    /// Venue-level (provider-less) reservations, sorted by span.start.
    pub reservations: Vec<Reservation>,
}

impl VenueState {
    pub fn new(id: Ulid, name: Option<String>, room_count: u32, default_buffer: Ms) -> Self {
        Self {
            id,
            name,
            room_count,
            default_buffer,
            providers: Vec::new(),
            reservations: Vec::new(),
        }
    }
}

/// A provider: shifts plus provider-assigned reservations, both sorted by
/// span.start.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub name: Option<String>,
    /// Overrides the venue default buffer when set.
    pub buffer_override: Option<Ms>,
    pub shifts: Vec<Shift>,
    pub reservations: Vec<Reservation>,
}

impl ProviderState {
    pub fn new(id: Ulid, venue_id: Ulid, name: Option<String>, buffer_override: Option<Ms>) -> Self {
        Self {
            id,
            venue_id,
            name,
            buffer_override,
            shifts: Vec::new(),
            reservations: Vec::new(),
        }
    }

    pub fn insert_shift(&mut self, shift: Shift) {
        let pos = self
            .shifts
            .binary_search_by_key(&shift.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.shifts.insert(pos, shift);
    }

    pub fn remove_shift(&mut self, id: Ulid) -> Option<Shift> {
        let pos = self.shifts.iter().position(|s| s.id == id)?;
        Some(self.shifts.remove(pos))
    }

    pub fn find_shift(&self, id: Ulid) -> Option<&Shift> {
        self.shifts.iter().find(|s| s.id == id)
    }

    /// First shift whose span overlaps `span`, skipping `exclude` (self on
    /// update). Status does not matter here: an unavailable shift still owns
    /// its time range.
    pub fn overlapping_shift(&self, span: &Span, exclude: Option<Ulid>) -> Option<&Shift> {
        self.shifts
            .iter()
            .find(|s| Some(s.id) != exclude && s.span.overlaps(span))
    }

    /// The shift that can host a booking window: available and fully
    /// containing the window.
    pub fn covering_shift(&self, span: &Span) -> Option<&Shift> {
        self.shifts
            .iter()
            .find(|s| s.status == ShiftStatus::Available && s.span.contains_span(span))
    }
}

/// Sorted-insert shared by both owner kinds.
pub fn insert_reservation(list: &mut Vec<Reservation>, reservation: Reservation) {
    let pos = list
        .binary_search_by_key(&reservation.span.start, |r| r.span.start)
        .unwrap_or_else(|e| e);
    list.insert(pos, reservation);
}

pub fn find_reservation(list: &[Reservation], id: Ulid) -> Option<&Reservation> {
    list.iter().find(|r| r.id == id)
}

pub fn find_reservation_mut(list: &mut [Reservation], id: Ulid) -> Option<&mut Reservation> {
    list.iter_mut().find(|r| r.id == id)
}

/// Buffer-expanded spans of active reservations overlapping `query`, sorted.
pub fn active_blocked_spans(list: &[Reservation], query: &Span) -> Vec<Span> {
    let mut spans: Vec<Span> = list
        .iter()
        .filter(|r| r.is_active() && r.blocked_span().overlaps(query))
        .map(|r| r.blocked_span())
        .collect();
    spans.sort_by_key(|s| s.start);
    spans
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting beyond the domain structs. This is the
/// WAL record format; replaying the full list rebuilds all in-memory state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    VenueCreated {
        id: Ulid,
        name: Option<String>,
        room_count: u32,
        default_buffer: Ms,
    },
    VenueUpdated {
        id: Ulid,
        name: Option<String>,
        room_count: u32,
        default_buffer: Ms,
    },
    VenueDeleted {
        id: Ulid,
    },
    ProviderCreated {
        id: Ulid,
        venue_id: Ulid,
        name: Option<String>,
        buffer_override: Option<Ms>,
    },
    ProviderDeleted {
        id: Ulid,
        venue_id: Ulid,
    },
    ShiftCreated {
        shift: Shift,
    },
    ShiftUpdated {
        shift: Shift,
    },
    ShiftDeleted {
        id: Ulid,
        provider_id: Ulid,
    },
    /// Carries the full row including its initial history entry.
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationTransitioned {
        id: Ulid,
        status: ReservationStatus,
        at: Ms,
        actor: String,
        note: Option<String>,
    },
    DeliveryEnqueued {
        delivery: Delivery,
    },
    /// Carries the resulting delivery state so replay is a plain overwrite.
    DeliveryAttempted {
        id: Ulid,
        outcome: AttemptOutcome,
        response_code: Option<u16>,
        error: Option<String>,
        at: Ms,
        attempt_count: u32,
        next_attempt_at: Ms,
        status: DeliveryStatus,
    },
    DeliveryCancelled {
        id: Ulid,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub slots: Vec<Span>,
}
