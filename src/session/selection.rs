use crate::time::SlotTime;

use super::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggled {
    Added,
    Removed,
}

/// The visitor's in-progress choice: sorted, deduplicated, at most `limit`
/// slots. Never authoritative; reconciled against every cache refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSet {
    limit: usize,
    slots: Vec<SlotTime>,
}

impl SelectionSet {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            slots: Vec::with_capacity(limit),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.limit > 0 && self.slots.len() == self.limit
    }

    pub fn contains(&self, slot: SlotTime) -> bool {
        self.slots.binary_search(&slot).is_ok()
    }

    pub fn slots(&self) -> &[SlotTime] {
        &self.slots
    }

    /// Remove if present; otherwise add unless full. A full set is left
    /// untouched.
    pub fn toggle(&mut self, slot: SlotTime) -> Result<Toggled, SessionError> {
        match self.slots.binary_search(&slot) {
            Ok(pos) => {
                self.slots.remove(pos);
                Ok(Toggled::Removed)
            }
            Err(_) if self.slots.len() >= self.limit => Err(SessionError::SelectionFull { limit: self.limit }),
            Err(pos) => {
                self.slots.insert(pos, slot);
                Ok(Toggled::Added)
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Drop every selected slot that appears in `claimed` (sorted ascending).
    /// Returns what was dropped.
    pub fn prune(&mut self, claimed: &[SlotTime]) -> Vec<SlotTime> {
        let mut dropped = Vec::new();
        self.slots.retain(|s| {
            if claimed.binary_search(s).is_ok() {
                dropped.push(*s);
                false
            } else {
                true
            }
        });
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> SlotTime {
        SlotTime::parse_strict(s).unwrap()
    }

    #[test]
    fn toggle_adds_sorted_and_removes() {
        let mut sel = SelectionSet::new(3);
        assert_eq!(sel.toggle(t("10:00")), Ok(Toggled::Added));
        assert_eq!(sel.toggle(t("09:00")), Ok(Toggled::Added));
        assert_eq!(sel.slots(), &[t("09:00"), t("10:00")]);
        assert_eq!(sel.toggle(t("10:00")), Ok(Toggled::Removed));
        assert_eq!(sel.slots(), &[t("09:00")]);
    }

    #[test]
    fn full_selection_rejects_without_change() {
        let mut sel = SelectionSet::new(2);
        sel.toggle(t("09:00")).unwrap();
        sel.toggle(t("09:15")).unwrap();
        let before = sel.clone();
        assert_eq!(sel.toggle(t("09:30")), Err(SessionError::SelectionFull { limit: 2 }));
        assert_eq!(sel, before);
        // removal still works when full
        assert_eq!(sel.toggle(t("09:00")), Ok(Toggled::Removed));
    }

    #[test]
    fn bound_holds_for_any_toggle_sequence() {
        for limit in 1..=5 {
            let mut sel = SelectionSet::new(limit);
            for i in 0..200u32 {
                let slot = SlotTime::from_minutes((i * 37) % 96 * 15).unwrap();
                let before = sel.clone();
                match sel.toggle(slot) {
                    Ok(_) => {}
                    Err(_) => assert_eq!(sel, before),
                }
                assert!(sel.len() <= limit);
                assert!(sel.slots().windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn prune_removes_claimed() {
        let mut sel = SelectionSet::new(3);
        for s in ["09:00", "09:15", "09:30"] {
            sel.toggle(t(s)).unwrap();
        }
        let dropped = sel.prune(&[t("08:00"), t("09:15"), t("09:30")]);
        assert_eq!(dropped, vec![t("09:15"), t("09:30")]);
        assert_eq!(sel.slots(), &[t("09:00")]);
        assert!(!sel.is_complete());
    }

    #[test]
    fn prune_leaves_disjoint_set() {
        let claimed = vec![t("09:00"), t("11:00"), t("12:30")];
        let mut sel = SelectionSet::new(4);
        for s in ["09:00", "10:00", "11:00", "12:00"] {
            sel.toggle(t(s)).unwrap();
        }
        sel.prune(&claimed);
        assert!(sel.slots().iter().all(|s| !claimed.contains(s)));
    }

    #[test]
    fn zero_limit_is_never_complete() {
        let mut sel = SelectionSet::new(0);
        assert!(!sel.is_complete());
        assert!(sel.toggle(t("09:00")).is_err());
    }
}
