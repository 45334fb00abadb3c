pub mod calendar;
mod conflict;
mod directory;
mod error;
mod intervals;
mod lifecycle;
mod locks;
mod maintenance;
mod queries;
mod slots;

pub use error::{EngineError, ErrorClass};
pub use intervals::{merge_overlapping, subtract_intervals};
pub use lifecycle::{DefaultResourcePolicy, Fallback, NewBooking};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;
use directory::DEFAULT_STAFF_NAME;

pub type SharedLedgerState = Arc<RwLock<LedgerState>>;

/// A ledger plus the immutable facts needed to plan locks without taking any.
#[derive(Clone)]
pub struct LedgerHandle {
    pub business_id: Ulid,
    pub kind: LedgerKind,
    pub state: SharedLedgerState,
}

impl LedgerHandle {
    fn new(id: Ulid, business_id: Ulid, kind: LedgerKind, name: Option<String>) -> Self {
        Self {
            business_id,
            kind,
            state: Arc::new(RwLock::new(LedgerState::new(id, business_id, kind, name))),
        }
    }
}

/// Directory row for a business: the record plus ids of what it owns.
#[derive(Debug, Clone)]
pub struct BusinessState {
    pub business: Business,
    pub staff: Vec<Ulid>,
    pub locations: Vec<Ulid>,
    pub services: Vec<Ulid>,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first Append, drains whatever else is already queued,
/// then pays for a single fsync and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
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
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

pub struct Engine {
    pub businesses: DashMap<Ulid, BusinessState>,
    pub locations: DashMap<Ulid, Location>,
    pub services: DashMap<Ulid, Service>,
    /// Staff ledgers keyed by staff id, pool ledgers keyed by business id.
    pub ledgers: DashMap<Ulid, LedgerHandle>,
    /// Reverse lookup: rule/blackout/booking id → ledger id
    pub(super) entity_to_ledger: DashMap<Ulid, Ulid>,
    /// Held by directory mutations and compaction, always before any ledger lock.
    pub(super) directory_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
}

fn is_directory_event(event: &Event) -> bool {
    matches!(
        event,
        Event::BusinessCreated { .. }
            | Event::BusinessDeleted { .. }
            | Event::LocationAdded { .. }
            | Event::LocationRemoved { .. }
            | Event::ServiceUpserted { .. }
            | Event::ServiceRemoved { .. }
            | Event::StaffCreated { .. }
            | Event::StaffDeleted { .. }
    )
}

/// Apply a ledger-scoped event (caller holds the write lock).
fn apply_to_ledger(ls: &mut LedgerState, event: &Event, entities: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RuleAdded { rule } => {
            ls.rules.push(*rule);
            entities.insert(rule.id, ls.id);
        }
        Event::RuleRemoved { id, .. } => {
            ls.rules.retain(|r| r.id != *id);
            entities.remove(id);
        }
        Event::BlackoutAdded {
            id, span, reason, ..
        } => {
            ls.insert_interval(Interval {
                id: *id,
                span: *span,
                kind: IntervalKind::Blackout {
                    reason: reason.clone(),
                },
            });
            entities.insert(*id, ls.id);
        }
        Event::BlackoutRemoved { id, .. } => {
            ls.remove_interval(*id);
            entities.remove(id);
        }
        Event::BookingCreated { booking, .. } => {
            entities.insert(booking.id, ls.id);
            ls.put_booking(booking.clone());
        }
        Event::BookingItemAdded { id, item, at, .. } => {
            if let Some(b) = ls.bookings.get_mut(id) {
                b.items.push(item.clone());
                b.updated_at = *at;
            }
        }
        Event::BookingTransitioned { id, to, at, .. } => {
            if let Some(mut b) = ls.bookings.get(id).cloned() {
                b.status = *to;
                b.updated_at = *at;
                ls.put_booking(b);
            }
        }
        Event::BookingRescheduled { id, span, at, .. } => {
            if let Some(mut b) = ls.bookings.get(id).cloned() {
                b.span = *span;
                b.updated_at = *at;
                ls.put_booking(b);
            }
        }
        // Directory events are applied at the map level.
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, Arc::new(SystemClock))
    }

    pub fn with_clock(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            businesses: DashMap::new(),
            locations: DashMap::new(),
            services: DashMap::new(),
            ledgers: DashMap::new(),
            entity_to_ledger: DashMap::new(),
            directory_lock: Mutex::new(()),
            wal_tx,
            notify,
            clock,
        };

        // We are the sole owner of every ledger Arc here, so try_read/try_write
        // cannot fail. Never block: this may run inside an async context.
        for event in &events {
            if is_directory_event(event) {
                engine.forget_deleted_ledgers(event)?;
                engine.apply_directory(event);
                continue;
            }
            let Some(ledger_id) = event.ledger_id() else {
                continue;
            };
            let Some(handle) = engine.get_ledger(&ledger_id) else {
                continue;
            };
            let mut guard = handle
                .state
                .try_write()
                .map_err(|_| io::Error::other("replay: ledger unexpectedly locked"))?;
            apply_to_ledger(&mut guard, event, &engine.entity_to_ledger);
        }

        Ok(engine)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Replay-time counterpart of the guard-holding cleanup in the delete paths.
    fn forget_deleted_ledgers(&self, event: &Event) -> io::Result<()> {
        let doomed: Vec<Ulid> = match event {
            Event::StaffDeleted { id, .. } => vec![*id],
            Event::BusinessDeleted { id } => {
                let mut ids = vec![*id];
                if let Some(bs) = self.businesses.get(id) {
                    ids.extend(bs.staff.iter().copied());
                }
                ids
            }
            _ => return Ok(()),
        };
        for id in doomed {
            if let Some(handle) = self.get_ledger(&id) {
                let guard = handle
                    .state
                    .try_read()
                    .map_err(|_| io::Error::other("replay: ledger unexpectedly locked"))?;
                self.forget_entities(&guard);
            }
        }
        Ok(())
    }

    /// Drop reverse-lookup entries for everything a ledger holds.
    pub(super) fn forget_entities(&self, ls: &LedgerState) {
        for rule in &ls.rules {
            self.entity_to_ledger.remove(&rule.id);
        }
        for interval in &ls.intervals {
            self.entity_to_ledger.remove(&interval.id);
        }
        for id in ls.bookings.keys() {
            self.entity_to_ledger.remove(id);
        }
    }

    /// Apply a directory event to the maps. Ledger contents are untouched.
    pub(super) fn apply_directory(&self, event: &Event) {
        match event {
            Event::BusinessCreated {
                id,
                name,
                tz_offset_minutes,
                requires_staff,
                requires_location,
                default_staff_id,
            } => {
                self.businesses.insert(
                    *id,
                    BusinessState {
                        business: Business {
                            id: *id,
                            name: name.clone(),
                            tz_offset_minutes: *tz_offset_minutes,
                            requires_staff: *requires_staff,
                            requires_location: *requires_location,
                        },
                        staff: default_staff_id.iter().copied().collect(),
                        locations: Vec::new(),
                        services: Vec::new(),
                    },
                );
                self.ledgers
                    .insert(*id, LedgerHandle::new(*id, *id, LedgerKind::Pool, None));
                if let Some(staff_id) = default_staff_id {
                    self.ledgers.insert(
                        *staff_id,
                        LedgerHandle::new(
                            *staff_id,
                            *id,
                            LedgerKind::Staff,
                            Some(DEFAULT_STAFF_NAME.into()),
                        ),
                    );
                }
            }
            Event::BusinessDeleted { id } => {
                if let Some((_, bs)) = self.businesses.remove(id) {
                    for staff_id in &bs.staff {
                        self.ledgers.remove(staff_id);
                    }
                    for location_id in &bs.locations {
                        self.locations.remove(location_id);
                    }
                    for service_id in &bs.services {
                        self.services.remove(service_id);
                    }
                }
                self.ledgers.remove(id);
            }
            Event::LocationAdded {
                id,
                business_id,
                name,
            } => {
                self.locations.insert(
                    *id,
                    Location {
                        id: *id,
                        business_id: *business_id,
                        name: name.clone(),
                    },
                );
                if let Some(mut bs) = self.businesses.get_mut(business_id) {
                    bs.locations.push(*id);
                }
            }
            Event::LocationRemoved { id, business_id } => {
                self.locations.remove(id);
                if let Some(mut bs) = self.businesses.get_mut(business_id) {
                    bs.locations.retain(|l| l != id);
                }
            }
            Event::ServiceUpserted { service } => {
                let is_new = self.services.insert(service.id, service.clone()).is_none();
                if is_new {
                    if let Some(mut bs) = self.businesses.get_mut(&service.business_id) {
                        bs.services.push(service.id);
                    }
                }
            }
            Event::ServiceRemoved { id, business_id } => {
                self.services.remove(id);
                if let Some(mut bs) = self.businesses.get_mut(business_id) {
                    bs.services.retain(|s| s != id);
                }
            }
            Event::StaffCreated {
                id,
                business_id,
                name,
            } => {
                self.ledgers.insert(
                    *id,
                    LedgerHandle::new(*id, *business_id, LedgerKind::Staff, Some(name.clone())),
                );
                if let Some(mut bs) = self.businesses.get_mut(business_id) {
                    bs.staff.push(*id);
                }
            }
            Event::StaffDeleted { id, business_id } => {
                self.ledgers.remove(id);
                if let Some(mut bs) = self.businesses.get_mut(business_id) {
                    bs.staff.retain(|s| s != id);
                }
            }
            _ => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_ledger(&self, id: &Ulid) -> Option<LedgerHandle> {
        self.ledgers.get(id).map(|e| e.value().clone())
    }

    /// A staff ledger; pool ledgers and unknown ids are `NotFound`.
    pub(super) fn get_staff_ledger(&self, staff_id: &Ulid) -> Result<LedgerHandle, EngineError> {
        match self.get_ledger(staff_id) {
            Some(h) if h.kind == LedgerKind::Staff => Ok(h),
            _ => Err(EngineError::NotFound(*staff_id)),
        }
    }

    pub fn get_ledger_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_ledger.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify, with the ledger's write lock held by the caller.
    pub(super) async fn persist_and_apply(
        &self,
        ledger_id: Ulid,
        ls: &mut LedgerState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_ledger(ls, event, &self.entity_to_ledger);
        self.notify.send(ledger_id, event);
        Ok(())
    }

    /// WAL-append + apply + notify for directory events. Caller holds `directory_lock`.
    pub(super) async fn persist_directory(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_directory(event);
        if let Some(channel) = event.ledger_id() {
            self.notify.send(channel, event);
        }
        Ok(())
    }
}
