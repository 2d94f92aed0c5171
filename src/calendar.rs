use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;
use ulid::Ulid;

use crate::engine::{free_windows, merge_overlapping, subtract_spans};
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Free,
    Break,
    Booked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarSlot {
    pub start: Ms,
    pub end: Ms,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub slots: Vec<CalendarSlot>,
}

/// Derived, eventually-consistent projection of provider availability for
/// display callers (search, guest APIs). Only the sync trigger writes it,
/// after a shift or reservation mutation commits; conflict detection always
/// goes to the authoritative engine state instead.
pub struct CalendarCache {
    days: DashMap<(Ulid, NaiveDate), Vec<CalendarSlot>>,
}

impl Default for CalendarCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarCache {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
        }
    }

    /// Recompute and store the given dates for a provider. Invoked with the
    /// provider lock still held, so the projection is consistent with the
    /// mutation that triggered it.
    pub fn resync_days(&self, provider: &ProviderState, dates: &[NaiveDate]) {
        for &date in dates {
            let slots = compute_day(provider, date);
            self.days.insert((provider.id, date), slots);
        }
        debug!(provider = %provider.id, days = dates.len(), "calendar resynced");
    }

    pub fn day(&self, provider_id: &Ulid, date: NaiveDate) -> Option<Vec<CalendarSlot>> {
        self.days.get(&(*provider_id, date)).map(|e| e.value().clone())
    }

    /// Read-through: cold days are computed and cached on the way out.
    pub fn day_or_compute(&self, provider: &ProviderState, date: NaiveDate) -> Vec<CalendarSlot> {
        if let Some(slots) = self.day(&provider.id, date) {
            return slots;
        }
        let slots = compute_day(provider, date);
        self.days.insert((provider.id, date), slots.clone());
        slots
    }

    pub fn invalidate_provider(&self, provider_id: &Ulid) {
        self.days.retain(|(pid, _), _| pid != provider_id);
    }
}

/// Materialize one day: free windows plus blocked segments with their cause.
pub fn compute_day(provider: &ProviderState, date: NaiveDate) -> Vec<CalendarSlot> {
    let day = day_bounds(date);

    let free = free_windows(provider, &day);

    let mut breaks: Vec<Span> = provider
        .shifts
        .iter()
        .filter(|s| s.status == ShiftStatus::Available && s.span.overlaps(&day))
        .flat_map(|s| s.breaks.spans().iter().copied())
        .filter(|b| b.overlaps(&day))
        .map(|b| b.clamp_to(&day))
        .collect();
    breaks.sort_by_key(|s| s.start);
    let breaks = merge_overlapping(&breaks);

    let mut booked: Vec<Span> = active_blocked_spans(&provider.reservations, &day)
        .iter()
        .map(|s| s.clamp_to(&day))
        .collect();
    booked.sort_by_key(|s| s.start);
    let booked = subtract_spans(&merge_overlapping(&booked), &breaks);

    let mut slots: Vec<CalendarSlot> = Vec::new();
    slots.extend(free.iter().map(|s| CalendarSlot {
        start: s.start,
        end: s.end,
        status: SlotStatus::Free,
    }));
    slots.extend(breaks.iter().map(|s| CalendarSlot {
        start: s.start,
        end: s.end,
        status: SlotStatus::Break,
    }));
    slots.extend(booked.iter().map(|s| CalendarSlot {
        start: s.start,
        end: s.end,
        status: SlotStatus::Booked,
    }));
    slots.sort_by_key(|s| s.start);
    slots
}

/// Calendar dates a span touches, for targeted resyncs.
pub fn dates_spanned(span: &Span) -> Vec<NaiveDate> {
    let (Some(first), Some(last)) = (date_of(span.start), date_of(span.end - 1)) else {
        return Vec::new();
    };
    first.iter_days().take_while(|d| *d <= last).collect()
}
