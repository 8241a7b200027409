use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::authority::AuthorityError;
use crate::model::{Booking, IdempotencyKey, ReservationReceipt, ReservationRequest};
use crate::time::SlotTime;

use super::reconcile::ConflictReport;
use super::{BookingSession, SessionError, fmt_times};

/// Holds the session's in-flight flag; clears it on drop, including when the
/// submitting future is dropped midway.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Attempt {
    request: ReservationRequest,
    generation: u64,
    /// Re-sending an unresolved request the selection no longer matches.
    replay: bool,
}

fn record(kind: &'static str, outcome: &'static str) {
    metrics::counter!(crate::observability::SUBMISSIONS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

impl BookingSession {
    /// Reserve the current selection: one slot directly, several as one
    /// all-or-nothing batch. At most one submission per session runs at a
    /// time; a second call while one is pending fails with
    /// `SubmissionInFlight` without touching the network.
    ///
    /// If an earlier request got no answer it is sent again under the same
    /// key before anything new, and its booking is what comes back.
    pub async fn submit(&self) -> Result<Booking, SessionError> {
        let kind = if self.party_size == 1 { "single" } else { "batch" };
        let Some(guard) = InFlight::acquire(&self.in_flight) else {
            debug!("submission already in flight; ignoring");
            record(kind, "in_flight");
            return Err(SessionError::SubmissionInFlight);
        };
        self.publish_now().await;
        let result = self.submit_guarded().await;
        drop(guard);
        self.publish_now().await;
        result
    }

    async fn submit_guarded(&self) -> Result<Booking, SessionError> {
        loop {
            let attempt = self.prepare().await.inspect_err(|e| {
                let kind = if self.party_size == 1 { "single" } else { "batch" };
                debug!("submission rejected locally: {e}");
                record(kind, "invalid");
            })?;
            let Attempt {
                request,
                generation,
                replay,
            } = attempt;
            let kind = request.kind_label();
            let target = request.target().clone();
            if replay {
                info!(
                    "replaying unresolved {kind} reservation {} for {target}: {}",
                    request.key(),
                    fmt_times(&request.times())
                );
            } else {
                info!("submitting {kind} reservation for {target}: {}", fmt_times(&request.times()));
            }

            let started = Instant::now();
            let outcome = tokio::time::timeout(self.settings.submit_timeout, self.authority.reserve(&request)).await;
            metrics::histogram!(crate::observability::SUBMISSION_DURATION_SECONDS, "kind" => kind)
                .record(started.elapsed().as_secs_f64());

            match outcome {
                Ok(Ok(receipt)) => return self.accept(&request, receipt, generation).await,
                Ok(Err(AuthorityError::Conflict { detail, .. })) if replay => {
                    // The earlier attempt never landed; the current selection goes out next.
                    info!("unresolved reservation {} did not land ({detail})", request.key());
                    record(kind, "replay_rejected");
                    self.forget_pending(generation).await;
                }
                Ok(Err(AuthorityError::Conflict { detail, conflicts })) => {
                    record(kind, "conflict");
                    let report = ConflictReport::new(&request, detail, conflicts.as_slice());
                    return Err(self.reconcile(report, generation).await);
                }
                Ok(Err(e)) => {
                    // Request stays pending: it is replayed as-is on the next submit.
                    warn!("{kind} reservation for {target} failed: {e}");
                    record(kind, "error");
                    return Err(SessionError::Transient(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        "{kind} reservation for {target} got no answer within {}s",
                        self.settings.submit_timeout.as_secs()
                    );
                    record(kind, "timeout");
                    return Err(SessionError::TimedOut(self.settings.submit_timeout));
                }
            }
        }
    }

    /// Freeze the selection into a request, or hand back the unresolved one.
    ///
    /// A request whose answer was lost may have been committed, and a
    /// refresh may since have pruned its times from the selection. Until the
    /// authority has answered it, that request is replayed under its own key
    /// instead of sending anything new.
    async fn prepare(&self) -> Result<Attempt, SessionError> {
        let mut state = self.state.lock().await;
        let Some(target) = state.target.clone() else {
            return Err(SessionError::NoTarget);
        };
        let times = state.selection.slots().to_vec();
        if let Some(pending) = &state.pending {
            return Ok(Attempt {
                replay: pending.times() != times,
                request: pending.clone(),
                generation: state.generation,
            });
        }
        if times.len() != self.party_size {
            return Err(SessionError::WrongSelectionCount {
                expected: self.party_size,
                actual: times.len(),
            });
        }

        let visitor = self.visitor.clone();
        let key = IdempotencyKey::generate();
        let request = if times.len() == 1 {
            ReservationRequest::Single {
                target,
                time: times[0],
                visitor,
                key,
            }
        } else {
            ReservationRequest::Batch {
                target,
                times,
                visitor,
                key,
            }
        };
        state.pending = Some(request.clone());
        Ok(Attempt {
            request,
            generation: state.generation,
            replay: false,
        })
    }

    async fn forget_pending(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.pending = None;
        }
    }

    async fn accept(
        &self,
        request: &ReservationRequest,
        receipt: ReservationReceipt,
        generation: u64,
    ) -> Result<Booking, SessionError> {
        let kind = request.kind_label();
        if let Err(reason) = check_receipt(&request.times(), &receipt, request.is_batch()) {
            error!("{kind} reservation {} for {} returned an inconsistent result: {reason}", request.key(), request.target());
            record(kind, "atomicity_violation");
            return Err(SessionError::AtomicityViolation(reason));
        }

        let booking = Booking {
            target: request.target().clone(),
            appointments: receipt.appointments,
            group: receipt.group,
        };
        info!(
            "booked {} for {} ({})",
            fmt_times(&request.times()),
            booking.target,
            booking.appointments.iter().map(|a| a.id.as_str()).collect::<Vec<_>>().join(", ")
        );
        record(kind, "ok");

        let mut state = self.state.lock().await;
        if state.generation == generation {
            // A replayed request books the visitor too; the newer picks are moot.
            state.selection.clear();
            state.pending = None;
            self.publish(&state);
        } else {
            debug!("target changed during submission; keeping the new selection");
        }
        Ok(booking)
    }
}

/// A success must cover exactly the requested times, and a batch must land
/// in a single group. Anything else is a partial or foreign result.
pub(crate) fn check_receipt(requested: &[SlotTime], receipt: &ReservationReceipt, batch: bool) -> Result<(), String> {
    let mut want = requested.to_vec();
    want.sort_unstable();
    let mut got: Vec<SlotTime> = receipt.appointments.iter().map(|a| a.time).collect();
    got.sort_unstable();
    if got != want {
        return Err(format!("requested [{}], got [{}]", fmt_times(&want), fmt_times(&got)));
    }
    if !batch {
        return Ok(());
    }

    let group_id = receipt
        .group
        .as_ref()
        .map(|g| g.id.as_str())
        .or_else(|| receipt.appointments.first().and_then(|a| a.group_id.as_deref()));
    let Some(group_id) = group_id else {
        return Err("batch result carries no group id".into());
    };
    if receipt.appointments.iter().any(|a| a.group_id.as_deref() != Some(group_id)) {
        return Err("appointments span more than one group".into());
    }
    if let Some(group) = &receipt.group
        && group.size != receipt.appointments.len()
    {
        return Err(format!(
            "group size {} but {} appointments",
            group.size,
            receipt.appointments.len()
        ));
    }
    Ok(())
}
