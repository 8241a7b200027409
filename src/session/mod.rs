mod booking;
mod cache;
mod error;
mod reconcile;
mod selection;

pub use cache::{AvailabilityCache, CacheStatus};
pub use error::SessionError;
pub use reconcile::ConflictReport;
pub use selection::{SelectionSet, Toggled};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::authority::{AllocationAuthority, AvailabilityQuery};
use crate::config::Settings;
use crate::grid;
use crate::limits::{MAX_CLAIMED_TIMES, MAX_PARTY_SIZE};
use crate::model::{ReservationRequest, Resource, Target, VisitorContext};
use crate::poll::{PollHandle, Trigger, spawn_poll};
use crate::time::SlotTime;

/// Wall-clock source for the past-slot filter.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time; no timezone arithmetic beyond that.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Always reports the same instant.
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Snapshot of everything a presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub target: Option<Target>,
    pub party_size: usize,
    pub available: Vec<SlotTime>,
    pub claimed: Vec<SlotTime>,
    pub selection: Vec<SlotTime>,
    pub status: CacheStatus,
    pub submitting: bool,
}

struct SessionState {
    target: Option<Target>,
    /// Bumped on every target change; results computed under an older
    /// generation are discarded.
    generation: u64,
    cache: AvailabilityCache,
    selection: SelectionSet,
    /// Last submission whose outcome is unknown (transient failure or
    /// timeout). It may have landed, so it is replayed under the same key
    /// before any other request goes out.
    pending: Option<ReservationRequest>,
}

/// One visitor's booking session: the availability cache, the selection and
/// the in-flight submission flag for a single (resource, date) at a time.
/// Nothing here is shared between sessions.
pub struct BookingSession {
    authority: Arc<dyn AllocationAuthority>,
    visitor: VisitorContext,
    party_size: usize,
    settings: Settings,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    in_flight: AtomicBool,
    poller: Mutex<Option<PollHandle>>,
    view: watch::Sender<SessionView>,
}

impl BookingSession {
    pub fn new(
        authority: Arc<dyn AllocationAuthority>,
        visitor: VisitorContext,
        party_size: usize,
        settings: Settings,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, SessionError> {
        if party_size == 0 || party_size > MAX_PARTY_SIZE {
            return Err(SessionError::InvalidPartySize(party_size));
        }
        let state = SessionState {
            target: None,
            generation: 0,
            cache: AvailabilityCache::new(),
            selection: SelectionSet::new(party_size),
            pending: None,
        };
        let (view, _) = watch::channel(SessionView {
            target: None,
            party_size,
            available: Vec::new(),
            claimed: Vec::new(),
            selection: Vec::new(),
            status: CacheStatus::Loading,
            submitting: false,
        });
        Ok(Arc::new(Self {
            authority,
            visitor,
            party_size,
            settings,
            clock,
            state: Mutex::new(state),
            in_flight: AtomicBool::new(false),
            poller: Mutex::new(None),
            view,
        }))
    }

    pub fn party_size(&self) -> usize {
        self.party_size
    }

    pub fn visitor(&self) -> &VisitorContext {
        &self.visitor
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    // ── Target & polling ────────────────────────────────────────

    /// Switch to another resource/date. Clears the selection, forgets the
    /// cache and restarts polling (with an immediate refresh) if it was on.
    pub async fn set_target(self: &Arc<Self>, resource: Resource, date: NaiveDate) {
        {
            let mut state = self.state.lock().await;
            let target = Target { resource, date };
            info!("session target -> {target}");
            state.generation += 1;
            state.target = Some(target);
            state.cache = AvailabilityCache::new();
            state.selection.clear();
            state.pending = None;
            self.publish(&state);
        }
        let mut poller = self.poller.lock().await;
        if let Some(old) = poller.take() {
            old.stop().await;
            *poller = Some(self.spawn_poller());
        }
    }

    pub async fn target(&self) -> Option<Target> {
        self.state.lock().await.target.clone()
    }

    /// Booking screen entered: start periodic refresh. Idempotent.
    pub async fn activate(self: &Arc<Self>) {
        let mut poller = self.poller.lock().await;
        if poller.as_ref().is_some_and(|p| p.is_running()) {
            return;
        }
        *poller = Some(self.spawn_poller());
    }

    /// Booking screen left: stop all periodic refreshing.
    pub async fn deactivate(&self) {
        let handle = self.poller.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub async fn is_active(&self) -> bool {
        self.poller.lock().await.as_ref().is_some_and(|p| p.is_running())
    }

    /// The host regained foreground/visibility: refresh now instead of
    /// waiting out the interval. Ignored while inactive.
    pub async fn regain_attention(&self) {
        if let Some(poller) = self.poller.lock().await.as_ref() {
            poller.wake();
        }
    }

    fn spawn_poller(self: &Arc<Self>) -> PollHandle {
        // Weak: the session owns the handle, the loop must not own the session.
        let session = Arc::downgrade(self);
        spawn_poll("availability", self.settings.poll_interval, move |trigger: Trigger| {
            let session = session.clone();
            async move {
                if let Some(session) = session.upgrade() {
                    let _ = session.refresh_as(trigger.as_str(), None).await;
                }
            }
        })
    }

    // ── Availability ────────────────────────────────────────────

    /// Re-read claimed times now. Returns the new claimed set; on failure the
    /// previous set stays in place (except before the first load).
    pub async fn refresh(&self) -> Result<Vec<SlotTime>, SessionError> {
        self.refresh_as("manual", None).await
    }

    /// Refresh under `label` for logs and metrics. With `expect_generation`,
    /// refuse to start if the target already moved on.
    async fn refresh_as(
        &self,
        label: &'static str,
        expect_generation: Option<u64>,
    ) -> Result<Vec<SlotTime>, SessionError> {
        let (query, generation) = {
            let state = self.state.lock().await;
            if expect_generation.is_some_and(|g| g != state.generation) {
                return Err(SessionError::Superseded);
            }
            let Some(target) = state.target.as_ref() else {
                return Err(SessionError::NoTarget);
            };
            let query = AvailabilityQuery {
                resource_id: target.resource.id.clone(),
                kind: target.resource.kind,
                date: target.date,
            };
            (query, state.generation)
        };

        let started = Instant::now();
        let fetched = tokio::time::timeout(self.settings.refresh_timeout, self.authority.read_availability(&query)).await;
        metrics::histogram!(crate::observability::REFRESH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        let fetched = match fetched {
            Ok(Ok(raw)) if raw.len() > MAX_CLAIMED_TIMES => {
                Err(format!("availability response too large ({} entries)", raw.len()))
            }
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "availability read timed out after {}s",
                self.settings.refresh_timeout.as_secs()
            )),
        };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("discarding late availability for {} ({label})", query.resource_id);
            metrics::counter!(crate::observability::REFRESH_TOTAL, "trigger" => label, "outcome" => "discarded")
                .increment(1);
            return Err(SessionError::Superseded);
        }
        match fetched {
            Ok(raw) => {
                let claimed = state.cache.apply_fetch(raw.as_slice()).to_vec();
                let dropped = state.selection.prune(&claimed);
                if !dropped.is_empty() {
                    info!("{} claimed elsewhere; removed from selection", fmt_times(&dropped));
                    metrics::counter!(crate::observability::SELECTION_PRUNED_TOTAL).increment(dropped.len() as u64);
                }
                metrics::counter!(crate::observability::REFRESH_TOTAL, "trigger" => label, "outcome" => "ok").increment(1);
                self.publish(&state);
                Ok(claimed)
            }
            Err(e) => {
                warn!("availability refresh failed for {} ({label}): {e}", query.resource_id);
                metrics::counter!(crate::observability::REFRESH_TOTAL, "trigger" => label, "outcome" => "error")
                    .increment(1);
                state.cache.apply_failure(e.clone());
                self.publish(&state);
                Err(SessionError::Transient(e))
            }
        }
    }

    /// Grid minus past minus claimed for the current target.
    pub async fn available_slots(&self) -> Vec<SlotTime> {
        let state = self.state.lock().await;
        self.available_in(&state)
    }

    pub async fn claimed(&self) -> Vec<SlotTime> {
        self.state.lock().await.cache.claimed().to_vec()
    }

    pub async fn cache_status(&self) -> CacheStatus {
        self.state.lock().await.cache.status().clone()
    }

    fn available_in(&self, state: &SessionState) -> Vec<SlotTime> {
        let Some(target) = state.target.as_ref() else {
            return Vec::new();
        };
        let bookable = grid::bookable_times(&self.settings.window, target.date, self.clock.now());
        state.cache.available(&bookable)
    }

    // ── Selection ───────────────────────────────────────────────

    /// Select or deselect one time. Only currently available times can be
    /// added; removal always succeeds.
    pub async fn toggle(&self, slot: SlotTime) -> Result<Toggled, SessionError> {
        let mut state = self.state.lock().await;
        if state.target.is_none() {
            return Err(SessionError::NoTarget);
        }
        if !state.selection.contains(slot) && self.available_in(&state).binary_search(&slot).is_err() {
            return Err(SessionError::SlotUnavailable(slot));
        }
        let toggled = state.selection.toggle(slot)?;
        self.publish(&state);
        Ok(toggled)
    }

    pub async fn clear_selection(&self) {
        let mut state = self.state.lock().await;
        state.selection.clear();
        self.publish(&state);
    }

    pub async fn selection(&self) -> Vec<SlotTime> {
        self.state.lock().await.selection.slots().to_vec()
    }

    // ── View ────────────────────────────────────────────────────

    fn publish(&self, state: &SessionState) {
        let view = SessionView {
            target: state.target.clone(),
            party_size: self.party_size,
            available: self.available_in(state),
            claimed: state.cache.claimed().to_vec(),
            selection: state.selection.slots().to_vec(),
            status: state.cache.status().clone(),
            submitting: self.is_submitting(),
        };
        self.view.send_replace(view);
    }

    async fn publish_now(&self) {
        let state = self.state.lock().await;
        self.publish(&state);
    }
}

pub(crate) fn fmt_times(times: &[SlotTime]) -> String {
    times.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
}
