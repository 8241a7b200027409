use std::time::Duration;

use crate::authority::AuthorityError;
use crate::time::SlotTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No resource/date chosen yet.
    NoTarget,
    InvalidPartySize(usize),
    /// Toggle refused: the selection already holds `limit` slots.
    SelectionFull { limit: usize },
    /// Toggle refused: the slot is claimed, past, or off the grid.
    SlotUnavailable(SlotTime),
    WrongSelectionCount { expected: usize, actual: usize },
    /// Another submission from this session has not resolved yet.
    SubmissionInFlight,
    /// Confirmed conflict: these requested times are claimed by someone else.
    Conflict { times: Vec<SlotTime>, batch: bool },
    /// Retryable failure; the authority's state is unchanged as far as we know.
    Transient(String),
    TimedOut(Duration),
    /// A batch came back partially applied or otherwise inconsistent. Nothing
    /// on this side can repair it.
    AtomicityViolation(String),
    /// The target changed while the operation was running; its result was
    /// discarded.
    Superseded,
}

impl SessionError {
    /// Errors that never touched the network.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SessionError::NoTarget
                | SessionError::InvalidPartySize(_)
                | SessionError::SelectionFull { .. }
                | SessionError::SlotUnavailable(_)
                | SessionError::WrongSelectionCount { .. }
        )
    }

    /// The visitor may resubmit the same selection as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Transient(_) | SessionError::TimedOut(_) | SessionError::SubmissionInFlight
        )
    }

    pub fn conflicting_times(&self) -> &[SlotTime] {
        match self {
            SessionError::Conflict { times, .. } => times,
            _ => &[],
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NoTarget => write!(f, "choose a provider and a date first"),
            SessionError::InvalidPartySize(n) => write!(f, "invalid party size: {n}"),
            SessionError::SelectionFull { limit } => {
                let s = if *limit == 1 { "" } else { "s" };
                write!(f, "you can select up to {limit} slot{s}; deselect a time to pick another")
            }
            SessionError::SlotUnavailable(t) => write!(f, "{t} is not available"),
            SessionError::WrongSelectionCount { expected, actual } => {
                let s = if *expected == 1 { "" } else { "s" };
                write!(f, "please select {expected} slot{s} (currently selected: {actual})")
            }
            SessionError::SubmissionInFlight => write!(f, "a booking is already being submitted"),
            SessionError::Conflict { times, batch: false } if times.len() <= 1 => {
                write!(f, "that slot was just taken; please pick another")
            }
            SessionError::Conflict { times, .. } => {
                let list: Vec<String> = times.iter().map(|t| t.to_string()).collect();
                write!(f, "some slots just got taken ({}); pick different times", list.join(", "))
            }
            SessionError::Transient(e) => write!(f, "booking failed, please try again: {e}"),
            SessionError::TimedOut(d) => write!(f, "no response after {}s, please try again", d.as_secs()),
            SessionError::AtomicityViolation(e) => write!(f, "inconsistent group booking: {e}"),
            SessionError::Superseded => write!(f, "provider or date changed"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<AuthorityError> for SessionError {
    /// Conflicts need reconciliation first and are never converted here.
    fn from(e: AuthorityError) -> Self {
        SessionError::Transient(e.to_string())
    }
}
