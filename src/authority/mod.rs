//! The allocation authority: the sole arbiter of which slots are claimed.
//!
//! The client only ever reads claimed times and submits reservations; the
//! authority owns atomic check-and-reserve per slot and all-or-nothing
//! semantics for batches.

mod http;
mod local;

pub use http::HttpAuthority;
pub use local::InMemoryAuthority;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::{ReservationReceipt, ReservationRequest, ResourceKind};

/// Input of an availability read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// 409: some requested time is already claimed. `conflicts` holds the raw
    /// times the authority named, if it named any.
    Conflict {
        detail: String,
        conflicts: Vec<String>,
    },
    /// Any other non-success status.
    Rejected { status: u16, detail: String },
    /// The request never produced a response (connect error, reset, timeout).
    Transport(String),
    /// A response arrived but could not be understood.
    Malformed(String),
}

impl fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityError::Conflict { detail, conflicts } if conflicts.is_empty() => {
                write!(f, "conflict: {detail}")
            }
            AuthorityError::Conflict { detail, conflicts } => {
                write!(f, "conflict: {detail} ({})", conflicts.join(", "))
            }
            AuthorityError::Rejected { status, detail } => write!(f, "rejected with {status}: {detail}"),
            AuthorityError::Transport(e) => write!(f, "transport error: {e}"),
            AuthorityError::Malformed(e) => write!(f, "malformed response: {e}"),
        }
    }
}

impl std::error::Error for AuthorityError {}

#[async_trait]
pub trait AllocationAuthority: Send + Sync {
    /// Claimed times for one resource on one date, as the authority spells
    /// them. Read-only; safe to call repeatedly and concurrently.
    async fn read_availability(&self, query: &AvailabilityQuery) -> Result<Vec<String>, AuthorityError>;

    /// Reserve one slot, or a batch atomically.
    async fn reserve(&self, request: &ReservationRequest) -> Result<ReservationReceipt, AuthorityError>;
}
