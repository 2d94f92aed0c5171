mod availability;
mod error;
mod queries;
mod reservations;
mod shifts;

pub use availability::{
    Bookability, evaluate_provider_booking, evaluate_venue_booking, free_windows,
    merge_overlapping, saturated_spans, subtract_spans,
};
pub use error::{EngineError, RejectReason};
pub use reservations::CreateReservation;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::calendar::CalendarCache;
use crate::config::CoreConfig;
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::outbox::Outbox;
use crate::wal::Wal;

pub type SharedVenueState = Arc<RwLock<VenueState>>;
pub type SharedProviderState = Arc<RwLock<ProviderState>>;

/// Which entity a reservation is serialized under: the provider for assigned
/// bookings, the venue for room-capacity bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Provider(Ulid),
    Venue(Ulid),
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Reject malformed/out-of-range windows before they reach interval math.
pub(crate) fn validate_time_range(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidTimeRange);
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::InvalidTimeRange);
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// One transaction: all events land durably or none do.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    'outer: for (events, _) in batch.iter() {
        for event in events {
            if let Err(e) = wal.append_buffered(event) {
                append_err = Some(e);
                break 'outer;
            }
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub(crate) venues: DashMap<Ulid, SharedVenueState>,
    pub(crate) providers: DashMap<Ulid, SharedProviderState>,
    /// Reverse lookup: reservation id → serialization owner.
    pub(crate) reservation_owner: DashMap<Ulid, Owner>,
    /// Reverse lookup: shift id → provider id.
    pub(crate) shift_to_provider: DashMap<Ulid, Ulid>,
    /// Idempotency key → reservation id, for replayed client requests.
    pub(crate) idempotency: DashMap<String, Ulid>,
    pub(crate) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub outbox: Arc<Outbox>,
    pub calendar: CalendarCache,
    config: CoreConfig,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        config: CoreConfig,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            venues: DashMap::new(),
            providers: DashMap::new(),
            reservation_owner: DashMap::new(),
            shift_to_provider: DashMap::new(),
            idempotency: DashMap::new(),
            wal_tx,
            notify,
            outbox: Arc::new(Outbox::new()),
            calendar: CalendarCache::new(),
            config,
        };

        // Replay — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Hand a transactional batch to the group-commit writer. Once this
    /// returns Ok the events WILL reach the WAL, even if the calling request
    /// future is dropped — so callers apply to memory before awaiting the
    /// durability ack, and a cancelled request never leaves the WAL and the
    /// in-memory state disagreeing.
    pub(crate) async fn wal_submit(
        &self,
        events: &[Event],
    ) -> Result<oneshot::Receiver<io::Result<()>>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events: events.to_vec(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        Ok(rx)
    }

    async fn wal_ack(rx: oneshot::Receiver<io::Result<()>>) -> Result<(), EngineError> {
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Submit + apply + ack for events that only touch engine-level maps and
    /// the outbox (no owner guard involved).
    pub(crate) async fn commit_unowned(&self, event: &Event) -> Result<(), EngineError> {
        let ack = self.wal_submit(std::slice::from_ref(event)).await?;
        self.outbox.apply(event);
        Self::wal_ack(ack).await
    }

    pub fn get_venue(&self, id: &Ulid) -> Option<SharedVenueState> {
        self.venues.get(id).map(|e| e.value().clone())
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    pub fn owner_of(&self, id: &Ulid) -> Option<Owner> {
        self.reservation_owner.get(id).map(|e| *e.value())
    }

    // ── Event application ────────────────────────────────

    /// Apply a provider-owned event. Caller holds the provider's write lock.
    pub(crate) fn apply_to_provider(&self, ps: &mut ProviderState, event: &Event) {
        match event {
            Event::ShiftCreated { shift } => {
                ps.insert_shift(shift.clone());
                self.shift_to_provider.insert(shift.id, shift.provider_id);
            }
            Event::ShiftUpdated { shift } => {
                ps.remove_shift(shift.id);
                ps.insert_shift(shift.clone());
                self.shift_to_provider.insert(shift.id, shift.provider_id);
            }
            Event::ShiftDeleted { id, .. } => {
                ps.remove_shift(*id);
                self.shift_to_provider.remove(id);
            }
            Event::ReservationCreated { reservation } => {
                self.index_reservation(reservation, Owner::Provider(ps.id));
                insert_reservation(&mut ps.reservations, reservation.clone());
            }
            Event::ReservationTransitioned {
                id,
                status,
                at,
                actor,
                note,
            } => {
                if let Some(r) = find_reservation_mut(&mut ps.reservations, *id) {
                    r.status = *status;
                    r.history.push(StatusEvent {
                        status: *status,
                        at: *at,
                        actor: actor.clone(),
                        note: note.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    /// Apply a venue-owned event. Caller holds the venue's write lock.
    pub(crate) fn apply_to_venue(&self, vs: &mut VenueState, event: &Event) {
        match event {
            Event::VenueUpdated {
                name,
                room_count,
                default_buffer,
                ..
            } => {
                vs.name = name.clone();
                vs.room_count = *room_count;
                vs.default_buffer = *default_buffer;
            }
            Event::ReservationCreated { reservation } => {
                self.index_reservation(reservation, Owner::Venue(vs.id));
                insert_reservation(&mut vs.reservations, reservation.clone());
            }
            Event::ReservationTransitioned {
                id,
                status,
                at,
                actor,
                note,
            } => {
                if let Some(r) = find_reservation_mut(&mut vs.reservations, *id) {
                    r.status = *status;
                    r.history.push(StatusEvent {
                        status: *status,
                        at: *at,
                        actor: actor.clone(),
                        note: note.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    fn index_reservation(&self, reservation: &Reservation, owner: Owner) {
        self.reservation_owner.insert(reservation.id, owner);
        if let Some(key) = &reservation.idempotency_key {
            self.idempotency.insert(key.clone(), reservation.id);
        }
    }

    /// WAL-submit + apply + notify + durability ack for a provider-owned
    /// batch. The apply runs synchronously after the submit succeeds, so a
    /// dropped caller cannot strand a half-applied transaction.
    pub(crate) async fn commit_provider(
        &self,
        venue_id: Ulid,
        ps: &mut ProviderState,
        events: Vec<Event>,
    ) -> Result<(), EngineError> {
        let ack = self.wal_submit(&events).await?;
        for event in &events {
            if is_outbox_event(event) {
                self.outbox.apply(event);
            } else {
                self.apply_to_provider(ps, event);
            }
            self.notify.send(venue_id, event);
        }
        Self::wal_ack(ack).await
    }

    /// WAL-submit + apply + notify + durability ack for a venue-owned batch.
    pub(crate) async fn commit_venue(
        &self,
        vs: &mut VenueState,
        events: Vec<Event>,
    ) -> Result<(), EngineError> {
        let venue_id = vs.id;
        let ack = self.wal_submit(&events).await?;
        for event in &events {
            if is_outbox_event(event) {
                self.outbox.apply(event);
            } else {
                self.apply_to_venue(vs, event);
            }
            self.notify.send(venue_id, event);
        }
        Self::wal_ack(ack).await
    }

    // ── Replay ───────────────────────────────────────────

    fn replay_event(&self, event: &Event) {
        match event {
            Event::VenueCreated {
                id,
                name,
                room_count,
                default_buffer,
            } => {
                let vs = VenueState::new(*id, name.clone(), *room_count, *default_buffer);
                self.venues.insert(*id, Arc::new(RwLock::new(vs)));
            }
            Event::VenueUpdated { id, .. } => {
                if let Some(venue) = self.get_venue(id) {
                    let mut guard = venue.try_write().expect("replay: uncontended write");
                    self.apply_to_venue(&mut guard, event);
                }
            }
            Event::VenueDeleted { id } => {
                self.remove_venue_replay(id);
            }
            Event::ProviderCreated {
                id,
                venue_id,
                name,
                buffer_override,
            } => {
                let ps = ProviderState::new(*id, *venue_id, name.clone(), *buffer_override);
                self.providers.insert(*id, Arc::new(RwLock::new(ps)));
                if let Some(venue) = self.get_venue(venue_id) {
                    let mut guard = venue.try_write().expect("replay: uncontended write");
                    guard.providers.push(*id);
                }
            }
            Event::ProviderDeleted { id, venue_id } => {
                if let Some((_, provider)) = self.providers.remove(id) {
                    let guard = provider.try_read().expect("replay: uncontended read");
                    self.unindex_provider(&guard);
                }
                if let Some(venue) = self.get_venue(venue_id) {
                    let mut guard = venue.try_write().expect("replay: uncontended write");
                    guard.providers.retain(|p| p != id);
                }
            }
            Event::ShiftCreated { shift } | Event::ShiftUpdated { shift } => {
                if let Some(provider) = self.get_provider(&shift.provider_id) {
                    let mut guard = provider.try_write().expect("replay: uncontended write");
                    self.apply_to_provider(&mut guard, event);
                }
            }
            Event::ShiftDeleted { provider_id, .. } => {
                if let Some(provider) = self.get_provider(provider_id) {
                    let mut guard = provider.try_write().expect("replay: uncontended write");
                    self.apply_to_provider(&mut guard, event);
                }
            }
            Event::ReservationCreated { reservation } => match reservation.provider_id {
                Some(pid) => {
                    if let Some(provider) = self.get_provider(&pid) {
                        let mut guard =
                            provider.try_write().expect("replay: uncontended write");
                        self.apply_to_provider(&mut guard, event);
                    }
                }
                None => {
                    if let Some(venue) = self.get_venue(&reservation.venue_id) {
                        let mut guard = venue.try_write().expect("replay: uncontended write");
                        self.apply_to_venue(&mut guard, event);
                    }
                }
            },
            Event::ReservationTransitioned { id, .. } => match self.owner_of(id) {
                Some(Owner::Provider(pid)) => {
                    if let Some(provider) = self.get_provider(&pid) {
                        let mut guard =
                            provider.try_write().expect("replay: uncontended write");
                        self.apply_to_provider(&mut guard, event);
                    }
                }
                Some(Owner::Venue(vid)) => {
                    if let Some(venue) = self.get_venue(&vid) {
                        let mut guard = venue.try_write().expect("replay: uncontended write");
                        self.apply_to_venue(&mut guard, event);
                    }
                }
                None => {}
            },
            Event::DeliveryEnqueued { .. }
            | Event::DeliveryAttempted { .. }
            | Event::DeliveryCancelled { .. } => {
                self.outbox.apply(event);
            }
        }
    }

    fn remove_venue_replay(&self, id: &Ulid) {
        let Some((_, venue)) = self.venues.remove(id) else {
            return;
        };
        let guard = venue.try_read().expect("replay: uncontended read");
        for pid in &guard.providers {
            if let Some((_, provider)) = self.providers.remove(pid) {
                let pguard = provider.try_read().expect("replay: uncontended read");
                self.unindex_provider(&pguard);
            }
        }
        self.unindex_reservations(&guard.reservations);
    }

    fn unindex_provider(&self, ps: &ProviderState) {
        for shift in &ps.shifts {
            self.shift_to_provider.remove(&shift.id);
        }
        self.unindex_reservations(&ps.reservations);
        self.calendar.invalidate_provider(&ps.id);
    }

    fn unindex_reservations(&self, reservations: &[Reservation]) {
        for r in reservations {
            self.reservation_owner.remove(&r.id);
            if let Some(key) = &r.idempotency_key {
                self.idempotency.remove(key);
            }
            self.outbox.cancel_for_reservation(&r.id);
        }
    }

    // ── Venue/provider registry ──────────────────────────
    //
    // Profile CRUD lives outside this core; only the attributes availability
    // depends on (capacity, buffers, ownership) are registered here.

    pub async fn create_venue(
        &self,
        id: Ulid,
        name: Option<String>,
        room_count: u32,
        default_buffer: Ms,
    ) -> Result<(), EngineError> {
        if self.venues.len() >= MAX_VENUES {
            return Err(EngineError::LimitExceeded("too many venues"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("venue name too long"));
        }
        if self.venues.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VenueCreated {
            id,
            name: name.clone(),
            room_count,
            default_buffer,
        };
        let ack = self.wal_submit(std::slice::from_ref(&event)).await?;
        let vs = VenueState::new(id, name, room_count, default_buffer);
        self.venues.insert(id, Arc::new(RwLock::new(vs)));
        self.notify.send(id, &event);
        Self::wal_ack(ack).await
    }

    pub async fn update_venue(
        &self,
        id: Ulid,
        name: Option<String>,
        room_count: u32,
        default_buffer: Ms,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("venue name too long"));
        }
        let venue = self.get_venue(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = venue.write().await;
        let event = Event::VenueUpdated {
            id,
            name,
            room_count,
            default_buffer,
        };
        self.commit_venue(&mut guard, vec![event]).await
    }

    /// Cascade delete: the venue's providers, shifts, and reservations go
    /// with it; their non-terminal deliveries are cancelled.
    pub async fn delete_venue(&self, id: Ulid) -> Result<(), EngineError> {
        let venue = self.get_venue(&id).ok_or(EngineError::NotFound(id))?;
        let guard = venue.write().await;

        let event = Event::VenueDeleted { id };
        let ack = self.wal_submit(std::slice::from_ref(&event)).await?;

        self.venues.remove(&id);
        for pid in guard.providers.clone() {
            if let Some((_, provider)) = self.providers.remove(&pid) {
                let pguard = provider.write().await;
                self.unindex_provider(&pguard);
            }
        }
        self.unindex_reservations(&guard.reservations);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Self::wal_ack(ack).await
    }

    pub async fn create_provider(
        &self,
        id: Ulid,
        venue_id: Ulid,
        name: Option<String>,
        buffer_override: Option<Ms>,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("provider name too long"));
        }
        if self.providers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let venue = self
            .get_venue(&venue_id)
            .ok_or(EngineError::NotFound(venue_id))?;
        let mut guard = venue.write().await;
        if guard.providers.len() >= MAX_PROVIDERS_PER_VENUE {
            return Err(EngineError::LimitExceeded("too many providers in venue"));
        }

        let event = Event::ProviderCreated {
            id,
            venue_id,
            name: name.clone(),
            buffer_override,
        };
        let ack = self.wal_submit(std::slice::from_ref(&event)).await?;
        let ps = ProviderState::new(id, venue_id, name, buffer_override);
        self.providers.insert(id, Arc::new(RwLock::new(ps)));
        guard.providers.push(id);
        self.notify.send(venue_id, &event);
        Self::wal_ack(ack).await
    }

    pub async fn delete_provider(&self, id: Ulid) -> Result<(), EngineError> {
        let provider = self.get_provider(&id).ok_or(EngineError::NotFound(id))?;
        let venue_id = provider.read().await.venue_id;
        // Venue before provider, matching every other multi-lock path.
        let venue = self.get_venue(&venue_id);
        let mut vguard = match &venue {
            Some(v) => Some(v.write().await),
            None => None,
        };
        let guard = provider.write().await;

        let event = Event::ProviderDeleted { id, venue_id };
        let ack = self.wal_submit(std::slice::from_ref(&event)).await?;

        self.providers.remove(&id);
        self.unindex_provider(&guard);
        if let Some(vg) = vguard.as_mut() {
            vg.providers.retain(|p| p != &id);
        }
        self.notify.send(venue_id, &event);
        Self::wal_ack(ack).await
    }

    // ── WAL compaction ───────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    /// Terminal reservations are kept: they are audit history, not churn.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let venues: Vec<SharedVenueState> =
            self.venues.iter().map(|e| e.value().clone()).collect();
        for venue in venues {
            let guard = venue.read().await;
            events.push(Event::VenueCreated {
                id: guard.id,
                name: guard.name.clone(),
                room_count: guard.room_count,
                default_buffer: guard.default_buffer,
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: r.clone(),
                });
            }
        }

        let providers: Vec<SharedProviderState> =
            self.providers.iter().map(|e| e.value().clone()).collect();
        for provider in providers {
            let guard = provider.read().await;
            events.push(Event::ProviderCreated {
                id: guard.id,
                venue_id: guard.venue_id,
                name: guard.name.clone(),
                buffer_override: guard.buffer_override,
            });
            for shift in &guard.shifts {
                events.push(Event::ShiftCreated {
                    shift: shift.clone(),
                });
            }
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: r.clone(),
                });
            }
        }

        // Deliveries carry their full state, so enqueue events restore them.
        for delivery in self.outbox.snapshot() {
            events.push(Event::DeliveryEnqueued { delivery });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn is_outbox_event(event: &Event) -> bool {
    matches!(
        event,
        Event::DeliveryEnqueued { .. }
            | Event::DeliveryAttempted { .. }
            | Event::DeliveryCancelled { .. }
    )
}

/// Write guard over a reservation's serialization owner.
pub(crate) enum OwnerGuard {
    Provider(tokio::sync::OwnedRwLockWriteGuard<ProviderState>),
    Venue(tokio::sync::OwnedRwLockWriteGuard<VenueState>),
}

impl OwnerGuard {
    pub(crate) fn find_reservation(&self, id: Ulid) -> Option<&Reservation> {
        match self {
            OwnerGuard::Provider(g) => find_reservation(&g.reservations, id),
            OwnerGuard::Venue(g) => find_reservation(&g.reservations, id),
        }
    }
}

impl Engine {
    /// Lookup reservation → owner, acquire the owner's write lock.
    pub(crate) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<OwnerGuard, EngineError> {
        let owner = self
            .owner_of(id)
            .ok_or(EngineError::NotFound(*id))?;
        match owner {
            Owner::Provider(pid) => {
                let provider = self
                    .get_provider(&pid)
                    .ok_or(EngineError::NotFound(pid))?;
                Ok(OwnerGuard::Provider(provider.write_owned().await))
            }
            Owner::Venue(vid) => {
                let venue = self.get_venue(&vid).ok_or(EngineError::NotFound(vid))?;
                Ok(OwnerGuard::Venue(venue.write_owned().await))
            }
        }
    }
}
