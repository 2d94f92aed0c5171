use serde_json::json;
use ulid::Ulid;

use crate::calendar::dates_spanned;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{evaluate_provider_booking, evaluate_venue_booking};
use super::{Engine, EngineError, OwnerGuard, now_ms, validate_time_range};

/// A booking request. The id is supplied by the caller so that retried
/// requests stay addressable; dedupe happens via `idempotency_key`.
#[derive(Debug, Clone)]
pub struct CreateReservation {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub provider_id: Option<Ulid>,
    pub start: Ms,
    pub end: Ms,
    pub customer: CustomerContact,
    pub price: Option<PriceInfo>,
    pub idempotency_key: Option<String>,
    pub actor: String,
}

impl Engine {
    /// Create a reservation with status `pending`. The availability check and
    /// the insert run under the owner's write lock, so concurrent attempts
    /// for overlapping windows serialize instead of racing.
    pub async fn create_reservation(
        &self,
        req: CreateReservation,
    ) -> Result<Reservation, EngineError> {
        if let Some(key) = &req.idempotency_key {
            if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(EngineError::LimitExceeded("idempotency key too long"));
            }
            // Replayed request: return the original row, create nothing.
            if let Some(existing) = self.reservation_by_key(key).await {
                return Ok(existing);
            }
        }
        if req.customer.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("customer name too long"));
        }
        if req.actor.len() > MAX_ACTOR_LEN {
            return Err(EngineError::LimitExceeded("actor too long"));
        }
        let span = validate_time_range(req.start, req.end)?;

        match req.provider_id {
            Some(provider_id) => self.create_for_provider(req, provider_id, span).await,
            None => self.create_for_venue(req, span).await,
        }
    }

    async fn create_for_provider(
        &self,
        req: CreateReservation,
        provider_id: Ulid,
        span: Span,
    ) -> Result<Reservation, EngineError> {
        // Venue default buffer is copied at creation time; a quick read
        // outside the provider lock is all the venue participates in.
        let default_buffer = {
            let venue = self
                .get_venue(&req.venue_id)
                .ok_or(EngineError::NotFound(req.venue_id))?;
            venue.read().await.default_buffer
        };
        let provider = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = provider.write().await;
        if guard.venue_id != req.venue_id {
            return Err(EngineError::NotFound(provider_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if let Some(key) = &req.idempotency_key
            && let Some(rid) = self.idempotency.get(key).map(|e| *e.value())
            && let Some(existing) = find_reservation(&guard.reservations, rid)
        {
            return Ok(existing.clone());
        }

        let buffer = guard.buffer_override.unwrap_or(default_buffer);
        let reasons = evaluate_provider_booking(&guard, &span, buffer);
        if !reasons.is_empty() {
            metrics::counter!(observability::BOOKING_REJECTIONS_TOTAL).increment(1);
            return Err(EngineError::BookingRejected(reasons));
        }

        let at = now_ms();
        let reservation = self.build_reservation(req, span, buffer, at);
        let mut events = vec![Event::ReservationCreated {
            reservation: reservation.clone(),
        }];
        events.extend(self.enqueue_events(&reservation, ReservationStatus::Pending, at));

        let venue_id = guard.venue_id;
        self.commit_provider(venue_id, &mut guard, events).await?;
        self.calendar
            .resync_days(&guard, &dates_spanned(&reservation.blocked_span()));
        metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
        Ok(reservation)
    }

    async fn create_for_venue(
        &self,
        req: CreateReservation,
        span: Span,
    ) -> Result<Reservation, EngineError> {
        let venue = self
            .get_venue(&req.venue_id)
            .ok_or(EngineError::NotFound(req.venue_id))?;
        let mut guard = venue.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if let Some(key) = &req.idempotency_key
            && let Some(rid) = self.idempotency.get(key).map(|e| *e.value())
            && let Some(existing) = find_reservation(&guard.reservations, rid)
        {
            return Ok(existing.clone());
        }

        let buffer = guard.default_buffer;
        let reasons = evaluate_venue_booking(&guard, &span, buffer);
        if !reasons.is_empty() {
            metrics::counter!(observability::BOOKING_REJECTIONS_TOTAL).increment(1);
            return Err(EngineError::BookingRejected(reasons));
        }

        let at = now_ms();
        let reservation = self.build_reservation(req, span, buffer, at);
        let mut events = vec![Event::ReservationCreated {
            reservation: reservation.clone(),
        }];
        events.extend(self.enqueue_events(&reservation, ReservationStatus::Pending, at));

        self.commit_venue(&mut guard, events).await?;
        metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
        Ok(reservation)
    }

    fn build_reservation(
        &self,
        req: CreateReservation,
        span: Span,
        buffer: Ms,
        at: Ms,
    ) -> Reservation {
        Reservation {
            id: req.id,
            venue_id: req.venue_id,
            provider_id: req.provider_id,
            span,
            buffer,
            status: ReservationStatus::Pending,
            idempotency_key: req.idempotency_key,
            customer: req.customer,
            price: req.price,
            history: vec![StatusEvent {
                status: ReservationStatus::Pending,
                at,
                actor: req.actor,
                note: None,
            }],
        }
    }

    /// Drive a reservation to `new_status`. Legal successors only; terminal
    /// statuses never move again. Cancel/decline never delete the row.
    pub async fn transition_reservation(
        &self,
        id: Ulid,
        new_status: ReservationStatus,
        actor: &str,
        note: Option<String>,
    ) -> Result<ReservationStatus, EngineError> {
        if actor.len() > MAX_ACTOR_LEN {
            return Err(EngineError::LimitExceeded("actor too long"));
        }
        if let Some(ref n) = note
            && n.len() > MAX_NOTE_LEN
        {
            return Err(EngineError::LimitExceeded("note too long"));
        }

        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard
            .find_reservation(id)
            .ok_or(EngineError::NotFound(id))?
            .clone();
        if !current.status.can_transition_to(new_status) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: new_status,
            });
        }

        let at = now_ms();
        let mut events = vec![Event::ReservationTransitioned {
            id,
            status: new_status,
            at,
            actor: actor.to_string(),
            note,
        }];
        let mut snapshot = current.clone();
        snapshot.status = new_status;
        events.extend(self.enqueue_events(&snapshot, new_status, at));

        match &mut guard {
            OwnerGuard::Provider(ps) => {
                let venue_id = ps.venue_id;
                self.commit_provider(venue_id, ps, events).await?;
                self.calendar
                    .resync_days(ps, &dates_spanned(&current.blocked_span()));
            }
            OwnerGuard::Venue(vs) => {
                self.commit_venue(vs, events).await?;
            }
        }
        metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "status" => new_status.as_str()
        )
        .increment(1);
        Ok(new_status)
    }

    /// One `DeliveryEnqueued` per configured channel for a status change.
    fn enqueue_events(
        &self,
        reservation: &Reservation,
        status: ReservationStatus,
        at: Ms,
    ) -> Vec<Event> {
        self.config()
            .channels
            .iter()
            .map(|&channel| Event::DeliveryEnqueued {
                delivery: Delivery {
                    id: Ulid::new(),
                    reservation_id: reservation.id,
                    channel,
                    status: DeliveryStatus::Pending,
                    payload: delivery_payload(reservation, status, at),
                    attempt_count: 0,
                    next_attempt_at: at,
                    last_attempt_at: None,
                    last_error: None,
                    attempts: Vec::new(),
                },
            })
            .collect()
    }

    async fn reservation_by_key(&self, key: &str) -> Option<Reservation> {
        let id = self.idempotency.get(key).map(|e| *e.value())?;
        self.get_reservation(id).await
    }

    /// Active reservations whose window ended more than `expiry_grace` ago.
    /// The reaper drives each through the normal transition path.
    pub fn collect_stale_active(&self, now: Ms) -> Vec<Ulid> {
        let cutoff = now - self.config().expiry_grace_ms;
        let mut stale = Vec::new();
        for entry in self.providers.iter() {
            if let Ok(guard) = entry.value().try_read() {
                stale.extend(
                    guard
                        .reservations
                        .iter()
                        .filter(|r| r.is_active() && r.span.end <= cutoff)
                        .map(|r| r.id),
                );
            }
        }
        for entry in self.venues.iter() {
            if let Ok(guard) = entry.value().try_read() {
                stale.extend(
                    guard
                        .reservations
                        .iter()
                        .filter(|r| r.is_active() && r.span.end <= cutoff)
                        .map(|r| r.id),
                );
            }
        }
        stale
    }
}

/// Snapshot handed to notification channels. Contact fields ride along so a
/// channel does not need to query the core back.
fn delivery_payload(reservation: &Reservation, status: ReservationStatus, at: Ms) -> serde_json::Value {
    json!({
        "reservation_id": reservation.id.to_string(),
        "venue_id": reservation.venue_id.to_string(),
        "provider_id": reservation.provider_id.map(|p| p.to_string()),
        "status": status.as_str(),
        "start": reservation.span.start,
        "end": reservation.span.end,
        "customer": {
            "name": reservation.customer.name,
            "phone": reservation.customer.phone,
            "email": reservation.customer.email,
        },
        "at": at,
    })
}
