use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, validate_time_range};

impl Engine {
    pub async fn create_shift(
        &self,
        id: Ulid,
        provider_id: Ulid,
        date: NaiveDate,
        start: Ms,
        end: Ms,
        breaks: Vec<(Ms, Ms)>,
        status: ShiftStatus,
    ) -> Result<(), EngineError> {
        let (span, break_list) = validate_shift_window(date, start, end, breaks)?;
        let provider = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = provider.write().await;
        if guard.shifts.len() >= MAX_SHIFTS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many shifts for provider"));
        }
        if self.shift_to_provider.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(existing) = guard.overlapping_shift(&span, None) {
            return Err(EngineError::ShiftOverlaps(existing.id));
        }

        let shift = Shift {
            id,
            provider_id,
            date,
            span,
            breaks: break_list,
            status,
        };
        let venue_id = guard.venue_id;
        self.commit_provider(venue_id, &mut guard, vec![Event::ShiftCreated { shift }])
            .await?;
        self.calendar.resync_days(&guard, &[date]);
        Ok(())
    }

    /// Returns the owning provider id. Re-checks overlap excluding the shift
    /// itself; moves resync both the old and the new date.
    pub async fn update_shift(
        &self,
        id: Ulid,
        date: NaiveDate,
        start: Ms,
        end: Ms,
        breaks: Vec<(Ms, Ms)>,
        status: ShiftStatus,
    ) -> Result<Ulid, EngineError> {
        let (span, break_list) = validate_shift_window(date, start, end, breaks)?;
        let provider_id = self
            .shift_to_provider
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let provider = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = provider.write().await;
        let old_date = guard
            .find_shift(id)
            .map(|s| s.date)
            .ok_or(EngineError::NotFound(id))?;
        if let Some(existing) = guard.overlapping_shift(&span, Some(id)) {
            return Err(EngineError::ShiftOverlaps(existing.id));
        }

        let shift = Shift {
            id,
            provider_id,
            date,
            span,
            breaks: break_list,
            status,
        };
        let venue_id = guard.venue_id;
        self.commit_provider(venue_id, &mut guard, vec![Event::ShiftUpdated { shift }])
            .await?;
        if old_date == date {
            self.calendar.resync_days(&guard, &[date]);
        } else {
            self.calendar.resync_days(&guard, &[old_date, date]);
        }
        Ok(provider_id)
    }

    pub async fn delete_shift(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let provider_id = self
            .shift_to_provider
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let provider = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = provider.write().await;
        let date = guard
            .find_shift(id)
            .map(|s| s.date)
            .ok_or(EngineError::NotFound(id))?;

        let venue_id = guard.venue_id;
        self.commit_provider(
            venue_id,
            &mut guard,
            vec![Event::ShiftDeleted { id, provider_id }],
        )
        .await?;
        self.calendar.resync_days(&guard, &[date]);
        Ok(provider_id)
    }
}

/// A shift's span must be well-formed and lie within its calendar date;
/// breaks must nest inside the span and stay pairwise disjoint.
fn validate_shift_window(
    date: NaiveDate,
    start: Ms,
    end: Ms,
    breaks: Vec<(Ms, Ms)>,
) -> Result<(Span, BreakList), EngineError> {
    let span = validate_time_range(start, end)?;
    if !day_bounds(date).contains_span(&span) {
        return Err(EngineError::InvalidTimeRange);
    }
    if breaks.len() > MAX_BREAKS_PER_SHIFT {
        return Err(EngineError::LimitExceeded("too many breaks in shift"));
    }
    let break_list = BreakList::new(&span, breaks).map_err(EngineError::InvalidBreaks)?;
    Ok((span, break_list))
}
