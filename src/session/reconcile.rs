use tracing::{info, warn};

use crate::model::ReservationRequest;
use crate::time::{SlotTime, normalize_claimed};

use super::{BookingSession, SessionError, fmt_times};

/// What a 409 said about a request. Lives only until reconciliation ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub requested: Vec<SlotTime>,
    /// Requested times the authority named as taken; empty if it named none.
    pub reported: Vec<SlotTime>,
    pub detail: String,
    pub batch: bool,
}

impl ConflictReport {
    pub fn new<S: AsRef<str>>(request: &ReservationRequest, detail: String, conflicts: &[S]) -> Self {
        let mut requested = request.times();
        requested.sort_unstable();
        let reported = normalize_claimed(conflicts)
            .into_iter()
            .filter(|t| requested.binary_search(t).is_ok())
            .collect();
        Self {
            requested,
            reported,
            detail,
            batch: request.is_batch(),
        }
    }

    /// Requested times the refreshed claimed set confirms as taken.
    pub fn confirmed(&self, claimed: &[SlotTime]) -> Vec<SlotTime> {
        self.requested
            .iter()
            .copied()
            .filter(|t| claimed.binary_search(t).is_ok())
            .collect()
    }
}

impl BookingSession {
    /// Bring the session back in line with the authority after a 409:
    /// re-read availability (which prunes the selection) and report only the
    /// conflicts the fresh read confirms. A rejection nothing confirms is
    /// treated as a retryable authority-side failure.
    pub(super) async fn reconcile(&self, report: ConflictReport, generation: u64) -> SessionError {
        // The attempt is over either way; a resubmission is a new request.
        {
            let mut state = self.state.lock().await;
            if state.generation == generation {
                state.pending = None;
            }
        }

        let claimed = match self.refresh_as("reconcile", Some(generation)).await {
            Ok(claimed) => claimed,
            Err(SessionError::Superseded) => return SessionError::Superseded,
            Err(e) => {
                warn!("conflict on {} but availability re-read failed: {e}", fmt_times(&report.requested));
                return SessionError::Transient(format!("{} (could not re-check availability)", report.detail));
            }
        };

        let confirmed = report.confirmed(&claimed);
        let unconfirmed: Vec<SlotTime> = report
            .reported
            .iter()
            .copied()
            .filter(|t| !confirmed.contains(t))
            .collect();
        if !unconfirmed.is_empty() {
            warn!("authority named {} as taken but they read as free", fmt_times(&unconfirmed));
        }
        if confirmed.is_empty() {
            warn!("conflict on {} not confirmed by availability; treating as transient", fmt_times(&report.requested));
            return SessionError::Transient(report.detail);
        }
        info!("conflict confirmed for {}", fmt_times(&confirmed));
        SessionError::Conflict {
            times: confirmed,
            batch: report.batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IdempotencyKey, Resource, Target, VisitorContext};
    use chrono::NaiveDate;

    fn t(s: &str) -> SlotTime {
        SlotTime::parse_strict(s).unwrap()
    }

    fn batch(times: &[&str]) -> ReservationRequest {
        ReservationRequest::Batch {
            target: Target {
                resource: Resource::doctor("1", "Dr. Chen", "Downtown"),
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            },
            times: times.iter().map(|s| t(s)).collect(),
            visitor: VisitorContext {
                visitor_id: "p".into(),
                phone: "0".into(),
                name: None,
            },
            key: IdempotencyKey::generate(),
        }
    }

    #[test]
    fn report_keeps_only_requested_names() {
        let report = ConflictReport::new(&batch(&["10:15", "10:00"]), "taken".into(), &["10:15 AM", "11:00"]);
        assert_eq!(report.requested, vec![t("10:00"), t("10:15")]);
        assert_eq!(report.reported, vec![t("10:15")]);
        assert!(report.batch);
    }

    #[test]
    fn confirmed_is_requested_intersect_claimed() {
        let report = ConflictReport::new(&batch(&["10:00", "10:15"]), "taken".into(), &["10:15"]);
        assert_eq!(report.confirmed(&[t("09:00"), t("10:15")]), vec![t("10:15")]);
        assert!(report.confirmed(&[t("09:00")]).is_empty());
    }
}
