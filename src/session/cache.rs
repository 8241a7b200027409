use tokio::time::Instant;

use crate::time::{SlotTime, normalize_claimed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// No read has completed for the current target.
    Loading,
    Fresh,
    /// The latest read failed; the previous claimed set is still served.
    Stale { error: String },
    /// The first read failed; the claimed set is empty and nothing is
    /// exposed as available.
    Unavailable { error: String },
}

impl CacheStatus {
    pub fn error(&self) -> Option<&str> {
        match self {
            CacheStatus::Stale { error } | CacheStatus::Unavailable { error } => Some(error),
            CacheStatus::Loading | CacheStatus::Fresh => None,
        }
    }
}

/// Claimed times for one (resource, date), as last reported by the
/// authority. Sorted, deduplicated, canonical.
#[derive(Debug, Clone)]
pub struct AvailabilityCache {
    claimed: Vec<SlotTime>,
    status: CacheStatus,
    fetched_at: Option<Instant>,
}

impl Default for AvailabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityCache {
    pub fn new() -> Self {
        Self {
            claimed: Vec::new(),
            status: CacheStatus::Loading,
            fetched_at: None,
        }
    }

    pub fn claimed(&self) -> &[SlotTime] {
        &self.claimed
    }

    pub fn status(&self) -> &CacheStatus {
        &self.status
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub fn is_claimed(&self, t: SlotTime) -> bool {
        self.claimed.binary_search(&t).is_ok()
    }

    /// A successful load has happened, so the claimed set can be trusted
    /// (possibly stale).
    pub fn has_loaded(&self) -> bool {
        self.fetched_at.is_some()
    }

    /// Replace the claimed set with a fresh read.
    pub fn apply_fetch<S: AsRef<str>>(&mut self, raw: &[S]) -> &[SlotTime] {
        self.claimed = normalize_claimed(raw);
        self.status = CacheStatus::Fresh;
        self.fetched_at = Some(Instant::now());
        &self.claimed
    }

    /// Record a failed read. Stale-but-known beats empty, except before the
    /// first successful load.
    pub fn apply_failure(&mut self, error: String) {
        if self.has_loaded() {
            self.status = CacheStatus::Stale { error };
        } else {
            self.claimed.clear();
            self.status = CacheStatus::Unavailable { error };
        }
    }

    /// `bookable` minus the claimed set. Empty until a load has succeeded.
    pub fn available(&self, bookable: &[SlotTime]) -> Vec<SlotTime> {
        if !self.has_loaded() {
            return Vec::new();
        }
        bookable.iter().copied().filter(|t| !self.is_claimed(*t)).collect()
    }
}
