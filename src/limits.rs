use std::time::Duration;

/// Largest party a single session may book for.
pub const MAX_PARTY_SIZE: usize = 12;

/// Claimed-time lists longer than this are treated as a malformed response.
pub const MAX_CLAIMED_TIMES: usize = 24 * 60;

/// Upper bound on one reservation batch, enforced by the in-memory authority.
pub const MAX_BATCH_SIZE: usize = MAX_PARTY_SIZE;

/// Poll intervals below this are clamped up.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Identifier length accepted by the in-memory authority.
pub const MAX_ID_LEN: usize = 256;
