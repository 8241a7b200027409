use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;

use crate::grid::OperatingWindow;
use crate::model::{Resource, ResourceKind, VisitorContext};
use crate::time::SlotTime;

/// Timing and grid knobs for a booking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Availability poll period while the booking screen is active.
    pub poll_interval: Duration,
    /// Bound on one availability read.
    pub refresh_timeout: Duration,
    /// Bound on one reservation; past it the submission is treated as failed
    /// and may be retried with the same idempotency key.
    pub submit_timeout: Duration,
    pub window: OperatingWindow,
    pub queue_poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(5),
            submit_timeout: Duration::from_secs(10),
            window: OperatingWindow::default(),
            queue_poll_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Everything the kiosk binary needs, loaded from `SLOTCLAIM_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub authority_url: String,
    pub metrics_port: Option<u16>,
    pub settings: Settings,
    pub resource: Resource,
    /// `None` means today.
    pub date: Option<NaiveDate>,
    pub party_size: usize,
    pub visitor: VisitorContext,
    /// Queue token to watch after booking, if any.
    pub token_no: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &'static str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = Settings::default();
        let secs = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse_opt::<u64>(var, get(var))?.map_or(default, Duration::from_secs))
        };
        let poll_interval = secs("SLOTCLAIM_POLL_SECS", defaults.poll_interval)?;
        let refresh_timeout = secs("SLOTCLAIM_REFRESH_TIMEOUT_SECS", defaults.refresh_timeout)?;
        let submit_timeout = secs("SLOTCLAIM_SUBMIT_TIMEOUT_SECS", defaults.submit_timeout)?;
        let queue_poll_interval = secs("SLOTCLAIM_QUEUE_POLL_SECS", defaults.queue_poll_interval)?;

        let time = |var: &'static str, default: SlotTime| -> Result<SlotTime, ConfigError> {
            match get(var) {
                None => Ok(default),
                Some(v) => SlotTime::parse_lenient(&v).ok_or(ConfigError::Invalid { var, value: v }),
            }
        };
        let open = time("SLOTCLAIM_OPEN", defaults.window.open)?;
        let close = time("SLOTCLAIM_CLOSE", defaults.window.close)?;
        let granularity = parse_opt::<u32>("SLOTCLAIM_GRANULARITY_MIN", get("SLOTCLAIM_GRANULARITY_MIN"))?
            .unwrap_or(defaults.window.granularity_min);
        let window = OperatingWindow::new(open, close, granularity).ok_or_else(|| ConfigError::Invalid {
            var: "SLOTCLAIM_OPEN/SLOTCLAIM_CLOSE/SLOTCLAIM_GRANULARITY_MIN",
            value: format!("{open}-{close} every {granularity}m"),
        })?;

        let kind = parse_opt::<ResourceKind>("SLOTCLAIM_RESOURCE_KIND", get("SLOTCLAIM_RESOURCE_KIND"))?
            .unwrap_or(ResourceKind::Doctor);
        let resource = Resource {
            id: get("SLOTCLAIM_RESOURCE_ID").unwrap_or_else(|| "1".into()),
            kind,
            name: get("SLOTCLAIM_RESOURCE_NAME").unwrap_or_default(),
            location: get("SLOTCLAIM_RESOURCE_LOCATION").unwrap_or_default(),
            specialty: get("SLOTCLAIM_RESOURCE_SPECIALTY"),
        };

        let date = match get("SLOTCLAIM_DATE") {
            None => None,
            Some(v) => Some(
                NaiveDate::parse_from_str(&v, "%Y-%m-%d").map_err(|_| ConfigError::Invalid {
                    var: "SLOTCLAIM_DATE",
                    value: v,
                })?,
            ),
        };

        let visitor = VisitorContext {
            visitor_id: get("SLOTCLAIM_PATIENT_ID").unwrap_or_else(|| "walkin".into()),
            phone: get("SLOTCLAIM_PHONE").unwrap_or_default(),
            name: get("SLOTCLAIM_NAME"),
        };

        Ok(Self {
            authority_url: get("SLOTCLAIM_AUTHORITY_URL").unwrap_or_else(|| "http://localhost:8000".into()),
            metrics_port: parse_opt("SLOTCLAIM_METRICS_PORT", get("SLOTCLAIM_METRICS_PORT"))?,
            settings: Settings {
                poll_interval,
                refresh_timeout,
                submit_timeout,
                window,
                queue_poll_interval,
            },
            resource,
            date,
            party_size: parse_opt("SLOTCLAIM_PARTY_SIZE", get("SLOTCLAIM_PARTY_SIZE"))?.unwrap_or(1),
            visitor,
            token_no: get("SLOTCLAIM_TOKEN_NO"),
        })
    }
}

fn parse_opt<T: FromStr>(var: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| ConfigError::Invalid { var, value: v }),
    }
}
