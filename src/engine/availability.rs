use serde::Serialize;

use crate::model::*;

use super::error::RejectReason;

// ── Availability algorithm ────────────────────────────────────────

/// Answer to an `is_bookable` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bookability {
    pub ok: bool,
    pub reasons: Vec<RejectReason>,
}

impl Bookability {
    pub fn allow() -> Self {
        Self {
            ok: true,
            reasons: Vec::new(),
        }
    }

    pub fn reject(reasons: Vec<RejectReason>) -> Self {
        Self {
            ok: false,
            reasons,
        }
    }

    pub fn from_reasons(reasons: Vec<RejectReason>) -> Self {
        if reasons.is_empty() {
            Self::allow()
        } else {
            Self::reject(reasons)
        }
    }
}

/// Free windows for a provider over `query`: available shift spans minus
/// breaks minus buffer-expanded active reservations.
pub fn free_windows(provider: &ProviderState, query: &Span) -> Vec<Span> {
    let mut open: Vec<Span> = provider
        .shifts
        .iter()
        .filter(|s| s.status == ShiftStatus::Available && s.span.overlaps(query))
        .map(|s| s.span.clamp_to(query))
        .collect();
    open.sort_by_key(|s| s.start);
    let mut free = merge_overlapping(&open);

    let mut blocked: Vec<Span> = provider
        .shifts
        .iter()
        .filter(|s| s.status == ShiftStatus::Available && s.span.overlaps(query))
        .flat_map(|s| s.breaks.spans().iter().copied())
        .filter(|b| b.overlaps(query))
        .collect();
    blocked.extend(active_blocked_spans(&provider.reservations, query));
    blocked.sort_by_key(|s| s.start);

    if !blocked.is_empty() {
        free = subtract_spans(&free, &blocked);
    }

    free
}

/// Evaluate a provider-assigned booking window. Collects every applicable
/// reason instead of stopping at the first.
pub fn evaluate_provider_booking(
    provider: &ProviderState,
    span: &Span,
    buffer: Ms,
) -> Vec<RejectReason> {
    let mut reasons = Vec::new();

    match provider.covering_shift(span) {
        None => reasons.push(RejectReason::NoShift),
        Some(shift) => {
            if shift.breaks.intersects(span) {
                reasons.push(RejectReason::OnBreak);
            }
        }
    }

    let blocked = span.expand(buffer);
    let conflict = provider
        .reservations
        .iter()
        .any(|r| r.is_active() && blocked.overlaps(&r.blocked_span()));
    if conflict {
        reasons.push(RejectReason::OverlapExistingReservation);
    }

    reasons
}

/// Evaluate a venue-level (provider-less) booking window against the venue's
/// room capacity.
pub fn evaluate_venue_booking(venue: &VenueState, span: &Span, buffer: Ms) -> Vec<RejectReason> {
    if venue.room_count == 0 {
        return vec![RejectReason::CapacityExceeded];
    }

    let candidate = span.expand(buffer);
    let allocs = active_blocked_spans(&venue.reservations, &candidate);
    let saturated = saturated_spans(&allocs, venue.room_count);
    if saturated.iter().any(|s| s.overlaps(&candidate)) {
        return vec![RejectReason::CapacityExceeded];
    }

    Vec::new()
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remaining sub-intervals of each `base` span after removing `to_remove`
/// (sorted by start). Order-preserving.
pub fn subtract_spans(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Sweep-line: time ranges where the concurrent allocation count reaches
/// `capacity`. Returns sorted, merged spans.
pub fn saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        let mut sorted = allocs.to_vec();
        sorted.sort_by_key(|s| s.start);
        return merge_overlapping(&sorted);
    }

    // Build sweep-line events: +1 at start, -1 at end
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start
        {
            result.push(Span::new(start, *time));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn provider_with(shifts: Vec<Shift>, reservations: Vec<Reservation>) -> ProviderState {
        let mut ps = ProviderState::new(Ulid::new(), Ulid::new(), None, None);
        for s in shifts {
            ps.insert_shift(s);
        }
        for r in reservations {
            insert_reservation(&mut ps.reservations, r);
        }
        ps
    }

    fn shift(start: Ms, end: Ms, breaks: Vec<(Ms, Ms)>) -> Shift {
        let span = Span::new(start, end);
        Shift {
            id: Ulid::new(),
            provider_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            span,
            breaks: BreakList::new(&span, breaks).unwrap(),
            status: ShiftStatus::Available,
        }
    }

    fn reservation(start: Ms, end: Ms, buffer: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            venue_id: Ulid::new(),
            provider_id: None,
            span: Span::new(start, end),
            buffer,
            status,
            idempotency_key: None,
            customer: CustomerContact::default(),
            price: None,
            history: Vec::new(),
        }
    }

    // ── subtract_spans ────────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_spans(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_spans(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_spans(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_spans(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    // ── free_windows ──────────────────────────────────────

    #[test]
    fn free_windows_subtracts_breaks_and_reservations() {
        let ps = provider_with(
            vec![shift(9 * H, 18 * H, vec![(13 * H, 14 * H)])],
            vec![reservation(10 * H, 11 * H, 0, ReservationStatus::Pending)],
        );
        let free = free_windows(&ps, &Span::new(0, 24 * H));
        assert_eq!(
            free,
            vec![
                Span::new(9 * H, 10 * H),
                Span::new(11 * H, 13 * H),
                Span::new(14 * H, 18 * H),
            ]
        );
    }

    #[test]
    fn free_windows_buffer_widens_blocked_range() {
        let ps = provider_with(
            vec![shift(9 * H, 18 * H, vec![])],
            vec![reservation(12 * H, 13 * H, 30 * M, ReservationStatus::Confirmed)],
        );
        let free = free_windows(&ps, &Span::new(0, 24 * H));
        assert_eq!(
            free,
            vec![
                Span::new(9 * H, 12 * H - 30 * M),
                Span::new(13 * H + 30 * M, 18 * H),
            ]
        );
    }

    #[test]
    fn free_windows_ignores_terminal_reservations() {
        let ps = provider_with(
            vec![shift(9 * H, 12 * H, vec![])],
            vec![reservation(10 * H, 11 * H, 0, ReservationStatus::Cancelled)],
        );
        let free = free_windows(&ps, &Span::new(0, 24 * H));
        assert_eq!(free, vec![Span::new(9 * H, 12 * H)]);
    }

    #[test]
    fn free_windows_no_shift_means_no_slots() {
        let ps = provider_with(vec![], vec![]);
        assert!(free_windows(&ps, &Span::new(0, 24 * H)).is_empty());
    }

    #[test]
    fn free_windows_unavailable_shift_excluded() {
        let mut s = shift(9 * H, 12 * H, vec![]);
        s.status = ShiftStatus::Unavailable;
        let ps = provider_with(vec![s], vec![]);
        assert!(free_windows(&ps, &Span::new(0, 24 * H)).is_empty());
    }

    // ── evaluate_provider_booking ─────────────────────────

    #[test]
    fn booking_inside_break_rejected() {
        // Shift 10:00-18:00 with break 13:00-14:00; request 13:30-14:30
        // intersects the break (and sticks out of nothing else).
        let ps = provider_with(vec![shift(10 * H, 18 * H, vec![(13 * H, 14 * H)])], vec![]);
        let reasons =
            evaluate_provider_booking(&ps, &Span::new(13 * H + 30 * M, 14 * H + 30 * M), 0);
        assert_eq!(reasons, vec![RejectReason::OnBreak]);
    }

    #[test]
    fn booking_without_covering_shift_rejected() {
        let ps = provider_with(vec![shift(10 * H, 12 * H, vec![])], vec![]);
        let reasons = evaluate_provider_booking(&ps, &Span::new(11 * H, 13 * H), 0);
        assert_eq!(reasons, vec![RejectReason::NoShift]);
    }

    #[test]
    fn booking_overlap_with_buffer_rejected() {
        let ps = provider_with(
            vec![shift(9 * H, 18 * H, vec![])],
            vec![reservation(10 * H, 11 * H, 15 * M, ReservationStatus::Pending)],
        );
        // 11:00-12:00 overlaps the buffered window [9:45, 11:15).
        let reasons = evaluate_provider_booking(&ps, &Span::new(11 * H, 12 * H), 15 * M);
        assert_eq!(reasons, vec![RejectReason::OverlapExistingReservation]);
        // 11:30-12:30 clears both buffers.
        let reasons = evaluate_provider_booking(&ps, &Span::new(11 * H + 30 * M, 12 * H + 30 * M), 15 * M);
        assert!(reasons.is_empty());
    }

    #[test]
    fn all_applicable_reasons_collected() {
        let ps = provider_with(
            vec![shift(10 * H, 18 * H, vec![(13 * H, 14 * H)])],
            vec![reservation(13 * H, 15 * H, 0, ReservationStatus::Confirmed)],
        );
        let reasons = evaluate_provider_booking(&ps, &Span::new(13 * H, 14 * H), 0);
        assert_eq!(
            reasons,
            vec![
                RejectReason::OnBreak,
                RejectReason::OverlapExistingReservation
            ]
        );
    }

    // ── evaluate_venue_booking ────────────────────────────

    fn venue_with(room_count: u32, reservations: Vec<Reservation>) -> VenueState {
        let mut vs = VenueState::new(Ulid::new(), None, room_count, 0);
        for r in reservations {
            insert_reservation(&mut vs.reservations, r);
        }
        vs
    }

    #[test]
    fn capacity_allows_up_to_room_count() {
        let vs = venue_with(
            2,
            vec![reservation(10 * H, 11 * H, 0, ReservationStatus::Pending)],
        );
        assert!(evaluate_venue_booking(&vs, &Span::new(10 * H, 11 * H), 0).is_empty());
    }

    #[test]
    fn capacity_exceeded_when_saturated() {
        let vs = venue_with(
            2,
            vec![
                reservation(10 * H, 11 * H, 0, ReservationStatus::Pending),
                reservation(10 * H, 11 * H, 0, ReservationStatus::Confirmed),
            ],
        );
        assert_eq!(
            evaluate_venue_booking(&vs, &Span::new(10 * H + 30 * M, 11 * H + 30 * M), 0),
            vec![RejectReason::CapacityExceeded]
        );
        // A window clear of the saturated range is fine.
        assert!(evaluate_venue_booking(&vs, &Span::new(11 * H, 12 * H), 0).is_empty());
    }

    #[test]
    fn capacity_ignores_terminal_reservations() {
        let vs = venue_with(
            1,
            vec![reservation(10 * H, 11 * H, 0, ReservationStatus::Declined)],
        );
        assert!(evaluate_venue_booking(&vs, &Span::new(10 * H, 11 * H), 0).is_empty());
    }

    #[test]
    fn zero_room_venue_rejects_everything() {
        let vs = venue_with(0, vec![]);
        assert_eq!(
            evaluate_venue_booking(&vs, &Span::new(0, H), 0),
            vec![RejectReason::CapacityExceeded]
        );
    }

    // ── saturated_spans ───────────────────────────────────

    #[test]
    fn saturated_spans_basic() {
        let allocs = vec![Span::new(0, 100), Span::new(50, 150)];
        assert_eq!(saturated_spans(&allocs, 2), vec![Span::new(50, 100)]);
    }

    #[test]
    fn saturated_spans_no_overlap() {
        let allocs = vec![Span::new(0, 100), Span::new(200, 300)];
        assert!(saturated_spans(&allocs, 2).is_empty());
    }

    #[test]
    fn saturated_spans_capacity_one() {
        let allocs = vec![Span::new(0, 100), Span::new(200, 300)];
        assert_eq!(
            saturated_spans(&allocs, 1),
            vec![Span::new(0, 100), Span::new(200, 300)]
        );
    }

    #[test]
    fn saturated_spans_three_overlap_capacity_three() {
        let allocs = vec![Span::new(0, 100), Span::new(25, 75), Span::new(50, 150)];
        assert_eq!(saturated_spans(&allocs, 3), vec![Span::new(50, 75)]);
    }

    #[test]
    fn saturated_spans_empty() {
        assert!(saturated_spans(&[], 5).is_empty());
    }
}
