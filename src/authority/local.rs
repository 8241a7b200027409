use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::{MAX_BATCH_SIZE, MAX_ID_LEN};
use crate::model::{Appointment, Group, IdempotencyKey, ReservationReceipt, ReservationRequest};
use crate::time::SlotTime;

use super::{AllocationAuthority, AuthorityError, AvailabilityQuery};

type LedgerKey = (String, NaiveDate);
type SharedLedger = Arc<RwLock<Ledger>>;

/// Claimed times for one resource on one date.
#[derive(Debug, Default)]
struct Ledger {
    /// time → appointment id
    claims: BTreeMap<SlotTime, String>,
}

/// In-process authority with per-(resource, date) check-and-reserve and
/// all-or-nothing batches. Reservations are deduplicated on their
/// idempotency key.
pub struct InMemoryAuthority {
    ledgers: DashMap<LedgerKey, SharedLedger>,
    receipts: DashMap<IdempotencyKey, ReservationReceipt>,
}

impl Default for InMemoryAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuthority {
    pub fn new() -> Self {
        Self {
            ledgers: DashMap::new(),
            receipts: DashMap::new(),
        }
    }

    fn ledger(&self, resource_id: &str, date: NaiveDate) -> SharedLedger {
        self.ledgers
            .entry((resource_id.to_string(), date))
            .or_default()
            .value()
            .clone()
    }

    /// Claim a slot on behalf of someone outside any session (another
    /// kiosk, the front desk). Returns false if it was already taken.
    pub async fn claim_external(&self, resource_id: &str, date: NaiveDate, time: SlotTime) -> bool {
        let ledger = self.ledger(resource_id, date);
        let mut guard = ledger.write().await;
        if guard.claims.contains_key(&time) {
            return false;
        }
        guard.claims.insert(time, Ulid::new().to_string());
        true
    }

    pub async fn claimed_times(&self, resource_id: &str, date: NaiveDate) -> Vec<SlotTime> {
        let ledger = self.ledger(resource_id, date);
        let guard = ledger.read().await;
        guard.claims.keys().copied().collect()
    }

    /// Number of distinct reservations accepted (replays excluded).
    pub fn reservation_count(&self) -> usize {
        self.receipts.len()
    }
}

#[async_trait]
impl AllocationAuthority for InMemoryAuthority {
    async fn read_availability(&self, query: &AvailabilityQuery) -> Result<Vec<String>, AuthorityError> {
        let ledger = self.ledger(&query.resource_id, query.date);
        let guard = ledger.read().await;
        Ok(guard.claims.keys().map(|t| t.to_string()).collect())
    }

    async fn reserve(&self, request: &ReservationRequest) -> Result<ReservationReceipt, AuthorityError> {
        let target = request.target();
        if target.resource.id.is_empty() || target.resource.id.len() > MAX_ID_LEN {
            return Err(AuthorityError::Rejected {
                status: 400,
                detail: "invalid resource id".into(),
            });
        }
        let times = request.times();
        if times.is_empty() || times.len() > MAX_BATCH_SIZE {
            return Err(AuthorityError::Rejected {
                status: 400,
                detail: format!("batch must hold 1..={MAX_BATCH_SIZE} times"),
            });
        }
        let mut distinct = times.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() != times.len() {
            return Err(AuthorityError::Rejected {
                status: 400,
                detail: "duplicate time in batch".into(),
            });
        }

        let ledger = self.ledger(&target.resource.id, target.date);
        let mut guard = ledger.write().await;

        // Replays are answered under the ledger lock so a concurrent retry
        // with the same key cannot slip past the check.
        if let Some(receipt) = self.receipts.get(&request.key()) {
            return Ok(receipt.value().clone());
        }

        // Phase 1: validate every time against current claims.
        let conflicts: Vec<SlotTime> = times
            .iter()
            .copied()
            .filter(|t| guard.claims.contains_key(t))
            .collect();
        if !conflicts.is_empty() {
            let detail = if request.is_batch() {
                "some slots are already booked".to_string()
            } else {
                "slot already booked".to_string()
            };
            return Err(AuthorityError::Conflict {
                detail,
                conflicts: conflicts.iter().map(|t| t.to_string()).collect(),
            });
        }

        // Phase 2: all validated, commit all.
        let group = request.is_batch().then(|| Group {
            id: Ulid::new().to_string(),
            size: times.len(),
        });
        let appointments: Vec<Appointment> = times
            .iter()
            .map(|&time| {
                let id = Ulid::new().to_string();
                guard.claims.insert(time, id.clone());
                Appointment {
                    id,
                    time,
                    group_id: group.as_ref().map(|g| g.id.clone()),
                }
            })
            .collect();

        let receipt = ReservationReceipt { appointments, group };
        self.receipts.insert(request.key(), receipt.clone());
        Ok(receipt)
    }
}
