use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::time::SlotTime;

/// What kind of bookable entity a resource is; sent as the `type` of an
/// availability read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Doctor,
    Diagnostics,
    Lab,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Doctor => "doctor",
            ResourceKind::Diagnostics => "diagnostics",
            ResourceKind::Lab => "lab",
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doctor" => Ok(ResourceKind::Doctor),
            "diagnostics" => Ok(ResourceKind::Diagnostics),
            "lab" => Ok(ResourceKind::Lab),
            other => Err(format!("unknown resource kind: {other}")),
        }
    }
}

/// An entity slots are booked against. Immutable for a booking session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    pub name: String,
    /// Grouping / location label (clinic name).
    pub location: String,
    pub specialty: Option<String>,
}

impl Resource {
    pub fn doctor(id: impl Into<String>, name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ResourceKind::Doctor,
            name: name.into(),
            location: location.into(),
            specialty: None,
        }
    }
}

/// The (resource, date) pair a session is currently looking at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub resource: Resource,
    pub date: NaiveDate,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource.id, self.date.format("%Y-%m-%d"))
    }
}

/// Opaque identity supplied by the identification step; attached to every
/// reservation, never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorContext {
    pub visitor_id: String,
    pub phone: String,
    pub name: Option<String>,
}

/// Client-generated token the authority deduplicates reservations on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub Ulid);

impl IdempotencyKey {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Built at submission time, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationRequest {
    Single {
        target: Target,
        time: SlotTime,
        visitor: VisitorContext,
        key: IdempotencyKey,
    },
    /// All-or-nothing: every time becomes an appointment in one group, or none do.
    Batch {
        target: Target,
        times: Vec<SlotTime>,
        visitor: VisitorContext,
        key: IdempotencyKey,
    },
}

impl ReservationRequest {
    pub fn target(&self) -> &Target {
        match self {
            ReservationRequest::Single { target, .. } | ReservationRequest::Batch { target, .. } => target,
        }
    }

    pub fn times(&self) -> Vec<SlotTime> {
        match self {
            ReservationRequest::Single { time, .. } => vec![*time],
            ReservationRequest::Batch { times, .. } => times.clone(),
        }
    }

    pub fn visitor(&self) -> &VisitorContext {
        match self {
            ReservationRequest::Single { visitor, .. } | ReservationRequest::Batch { visitor, .. } => visitor,
        }
    }

    pub fn key(&self) -> IdempotencyKey {
        match self {
            ReservationRequest::Single { key, .. } | ReservationRequest::Batch { key, .. } => *key,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, ReservationRequest::Batch { .. })
    }

    /// Short label for logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        if self.is_batch() { "batch" } else { "single" }
    }
}

/// A server-owned appointment, known here only by id and assigned time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub time: SlotTime,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub size: usize,
}

/// What the authority returns on a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationReceipt {
    pub appointments: Vec<Appointment>,
    /// Present for batch reservations.
    pub group: Option<Group>,
}

/// A confirmed booking handed back to the caller of `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub target: Target,
    pub appointments: Vec<Appointment>,
    pub group: Option<Group>,
}

impl Booking {
    pub fn first_appointment_id(&self) -> Option<&str> {
        self.appointments.first().map(|a| a.id.as_str())
    }
}
