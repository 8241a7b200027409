use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Minutes in a day; every valid `SlotTime` is below this.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// A wall-clock time of day at minute precision, 24-hour.
///
/// Ordering is chronological, which matches lexicographic order of the
/// canonical `HH:mm` rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTime(u16);

impl SlotTime {
    pub const MIDNIGHT: SlotTime = SlotTime(0);

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self((hour * 60 + minute) as u16))
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        if minutes >= MINUTES_PER_DAY as u32 {
            return None;
        }
        Some(Self(minutes as u16))
    }

    pub fn hour(&self) -> u32 {
        (self.0 / 60) as u32
    }

    pub fn minute(&self) -> u32 {
        (self.0 % 60) as u32
    }

    pub fn minutes(&self) -> u32 {
        self.0 as u32
    }

    /// Strict `HH:mm` (exactly two digits each side). Used on canonical data.
    pub fn parse_strict(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() != 5 || b[2] != b':' {
            return None;
        }
        if ![b[0], b[1], b[3], b[4]].iter().all(u8::is_ascii_digit) {
            return None;
        }
        let hour = ((b[0] - b'0') * 10 + (b[1] - b'0')) as u32;
        let minute = ((b[3] - b'0') * 10 + (b[4] - b'0')) as u32;
        Self::from_hm(hour, minute)
    }

    /// Lenient parse: 24-hour `H:mm`/`HH:mm`, 12-hour `H:mm AM/PM`,
    /// optionally with a trailing `:ss` that is dropped.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return None;
        }
        let upper = s.to_ascii_uppercase();
        let (core, meridiem) = if let Some(rest) = upper.strip_suffix("AM") {
            (rest.trim_end(), Some(false))
        } else if let Some(rest) = upper.strip_suffix("PM") {
            (rest.trim_end(), Some(true))
        } else {
            (upper.as_str(), None)
        };

        let mut parts = core.split(':');
        let hour = parse_field(parts.next()?)?;
        let minute = parse_field(parts.next()?)?;
        if let Some(seconds) = parts.next()
            && parse_field(seconds)? > 59
        {
            return None;
        }
        if parts.next().is_some() {
            return None;
        }

        let hour = match meridiem {
            None => hour,
            Some(pm) => {
                if !(1..=12).contains(&hour) {
                    return None;
                }
                match (pm, hour) {
                    (false, 12) => 0,
                    (false, h) => h,
                    (true, 12) => 12,
                    (true, h) => h + 12,
                }
            }
        };
        Self::from_hm(hour, minute)
    }

    /// Step forward by `minutes`; `None` once past the end of the day.
    pub fn checked_add_minutes(&self, minutes: u32) -> Option<Self> {
        Self::from_minutes(self.0 as u32 + minutes)
    }
}

/// One or two ASCII digits.
fn parse_field(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for SlotTime {
    type Err = InvalidSlotTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_lenient(s).ok_or_else(|| InvalidSlotTime(s.to_string()))
    }
}

impl From<chrono::NaiveTime> for SlotTime {
    fn from(t: chrono::NaiveTime) -> Self {
        use chrono::Timelike;
        Self((t.hour() * 60 + t.minute()) as u16)
    }
}

impl Serialize for SlotTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSlotTime(pub String);

impl fmt::Display for InvalidSlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a wall-clock time: {:?}", self.0)
    }
}

impl std::error::Error for InvalidSlotTime {}

// ── String-level helpers ─────────────────────────────────────────

/// Canonical `HH:mm` for anything `parse_lenient` accepts; the input
/// unchanged otherwise.
pub fn canonicalize(raw: &str) -> String {
    match SlotTime::parse_lenient(raw) {
        Some(t) => t.to_string(),
        None => raw.to_string(),
    }
}

/// Total order over canonical strings. Unparseable strings sort after all
/// valid times, among themselves lexicographically.
pub fn compare_hhmm(a: &str, b: &str) -> Ordering {
    match (SlotTime::parse_strict(a), SlotTime::parse_strict(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Canonicalize, drop anything that is not strict `HH:mm` afterwards,
/// dedup, sort ascending. This is the shape the availability cache stores.
pub fn normalize_claimed<S: AsRef<str>>(raw: &[S]) -> Vec<SlotTime> {
    let mut out: Vec<SlotTime> = raw
        .iter()
        .filter_map(|s| SlotTime::parse_strict(&canonicalize(s.as_ref())))
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}
