use chrono::{NaiveDate, NaiveDateTime};

use crate::time::SlotTime;

/// Half-open operating window `[open, close)` stepped at a fixed granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingWindow {
    pub open: SlotTime,
    pub close: SlotTime,
    pub granularity_min: u32,
}

impl OperatingWindow {
    /// `None` when the window is empty or the granularity is zero.
    pub fn new(open: SlotTime, close: SlotTime, granularity_min: u32) -> Option<Self> {
        if open >= close || granularity_min == 0 {
            return None;
        }
        Some(Self {
            open,
            close,
            granularity_min,
        })
    }

    pub fn contains(&self, t: SlotTime) -> bool {
        self.open <= t
            && t < self.close
            && (t.minutes() - self.open.minutes()) % self.granularity_min == 0
    }
}

impl Default for OperatingWindow {
    fn default() -> Self {
        Self {
            open: SlotTime::from_minutes(8 * 60).unwrap_or(SlotTime::MIDNIGHT),
            close: SlotTime::from_minutes(20 * 60).unwrap_or(SlotTime::MIDNIGHT),
            granularity_min: 15,
        }
    }
}

/// Every grid point in `[open, close)`, ascending.
pub fn generate(window: &OperatingWindow) -> Vec<SlotTime> {
    let mut out = Vec::new();
    let mut t = Some(window.open);
    while let Some(cur) = t {
        if cur >= window.close {
            break;
        }
        out.push(cur);
        t = cur.checked_add_minutes(window.granularity_min);
    }
    out
}

/// The grid for `date`, minus anything at or before the current wall-clock
/// minute when `date` is today. Other dates get the full grid.
pub fn bookable_times(window: &OperatingWindow, date: NaiveDate, now: NaiveDateTime) -> Vec<SlotTime> {
    let all = generate(window);
    if date != now.date() {
        return all;
    }
    let current = SlotTime::from(now.time());
    all.into_iter().filter(|t| *t > current).collect()
}
