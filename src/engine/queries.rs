use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::CalendarDay;
use crate::limits::*;
use crate::model::*;

use super::availability::{
    Bookability, evaluate_provider_booking, evaluate_venue_booking, free_windows,
};
use super::{Engine, EngineError, Owner, RejectReason, validate_time_range};

impl Engine {
    /// Single yes/no bookability probe, with every applicable reason.
    ///
    /// This is a diagnostic read: `create_reservation` re-evaluates the same
    /// checks under the owner's write lock before committing. Unknown state
    /// fails closed — a window we cannot evaluate is not bookable.
    pub async fn is_bookable(
        &self,
        venue_id: Ulid,
        provider_id: Option<Ulid>,
        start: Ms,
        end: Ms,
    ) -> Bookability {
        let span = match validate_time_range(start, end) {
            Ok(span) => span,
            Err(_) => return Bookability::reject(vec![RejectReason::InvalidTimeRange]),
        };

        let Some(venue) = self.get_venue(&venue_id) else {
            return Bookability::reject(vec![RejectReason::InternalError]);
        };

        match provider_id {
            Some(pid) => {
                let default_buffer = venue.read().await.default_buffer;
                let Some(provider) = self.get_provider(&pid) else {
                    // An unknown provider has no shifts to book against.
                    return Bookability::reject(vec![RejectReason::NoShift]);
                };
                let guard = provider.read().await;
                if guard.venue_id != venue_id {
                    return Bookability::reject(vec![RejectReason::NoShift]);
                }
                let buffer = guard.buffer_override.unwrap_or(default_buffer);
                Bookability::from_reasons(evaluate_provider_booking(&guard, &span, buffer))
            }
            None => {
                let guard = venue.read().await;
                let buffer = guard.default_buffer;
                Bookability::from_reasons(evaluate_venue_booking(&guard, &span, buffer))
            }
        }
    }

    /// Open slots per date. Dates without a shift yield an empty slot list,
    /// not an error.
    pub async fn free_slots(
        &self,
        provider_id: Ulid,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        validate_date_window(date_from, date_to)?;
        let Some(provider) = self.get_provider(&provider_id) else {
            return Ok(Vec::new());
        };
        let guard = provider.read().await;
        Ok(date_from
            .iter_days()
            .take_while(|d| *d <= date_to)
            .map(|date| DayAvailability {
                date,
                slots: free_windows(&guard, &day_bounds(date)),
            })
            .collect())
    }

    /// Cached calendar projection for display. Missing days are computed and
    /// cached on the way out; conflict checks never consult this.
    pub async fn calendar_days(
        &self,
        provider_id: Ulid,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<CalendarDay>, EngineError> {
        validate_date_window(date_from, date_to)?;
        let Some(provider) = self.get_provider(&provider_id) else {
            return Ok(Vec::new());
        };
        let guard = provider.read().await;
        Ok(date_from
            .iter_days()
            .take_while(|d| *d <= date_to)
            .map(|date| CalendarDay {
                date,
                slots: self.calendar.day_or_compute(&guard, date),
            })
            .collect())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        match self.owner_of(&id)? {
            Owner::Provider(pid) => {
                let provider = self.get_provider(&pid)?;
                let guard = provider.read().await;
                find_reservation(&guard.reservations, id).cloned()
            }
            Owner::Venue(vid) => {
                let venue = self.get_venue(&vid)?;
                let guard = venue.read().await;
                find_reservation(&guard.reservations, id).cloned()
            }
        }
    }

    pub async fn shifts_for_provider(&self, provider_id: Ulid) -> Vec<Shift> {
        let Some(provider) = self.get_provider(&provider_id) else {
            return Vec::new();
        };
        let guard = provider.read().await;
        guard.shifts.clone()
    }
}

fn validate_date_window(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if to < from {
        return Err(EngineError::InvalidTimeRange);
    }
    let days = (to - from).num_days() + 1;
    if days > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}
