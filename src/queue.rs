//! Live queue position for a visitor's token: the availability poll shape
//! reused for a single read-only status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use crate::authority::{AuthorityError, HttpAuthority};
use crate::poll::{PollHandle, spawn_poll};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub token_no: String,
    /// People ahead; 0 means next.
    pub position: u32,
    /// Estimated wait range in minutes.
    pub eta_low: u32,
    pub eta_high: u32,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub status: String,
}

impl QueueStatus {
    pub fn is_next(&self) -> bool {
        self.position == 0
    }

    pub fn eta_label(&self) -> String {
        format!("{}-{} min", self.eta_low, self.eta_high)
    }
}

/// Last known queue status. `stale` is set while polls fail after at least
/// one success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    pub status: Option<QueueStatus>,
    pub stale: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait QueueStatusSource: Send + Sync {
    async fn queue_status(&self, token_no: &str) -> Result<QueueStatus, AuthorityError>;
}

#[async_trait]
impl QueueStatusSource for HttpAuthority {
    async fn queue_status(&self, token_no: &str) -> Result<QueueStatus, AuthorityError> {
        let request = self
            .client()
            .get(self.url("/api/queue/status"))
            .header("Cache-Control", "no-store")
            .query(&[("tokenNo", token_no)]);
        self.fetch_json(request).await
    }
}

struct Shared {
    source: Arc<dyn QueueStatusSource>,
    token_no: String,
    view: watch::Sender<QueueSnapshot>,
}

impl Shared {
    async fn poll(&self) {
        match self.source.queue_status(&self.token_no).await {
            Ok(status) => {
                metrics::counter!(crate::observability::QUEUE_REFRESH_TOTAL, "outcome" => "ok").increment(1);
                self.view.send_replace(QueueSnapshot {
                    status: Some(status),
                    stale: false,
                    error: None,
                });
            }
            Err(e) => {
                warn!("queue status for token {} failed: {e}", self.token_no);
                metrics::counter!(crate::observability::QUEUE_REFRESH_TOTAL, "outcome" => "error").increment(1);
                self.view.send_modify(|snapshot| {
                    snapshot.stale = snapshot.status.is_some();
                    snapshot.error = Some(e.to_string());
                });
            }
        }
    }
}

/// Polls one token's queue status until stopped or dropped.
pub struct QueueWatcher {
    shared: Arc<Shared>,
    poller: PollHandle,
}

impl QueueWatcher {
    pub fn start(source: Arc<dyn QueueStatusSource>, token_no: impl Into<String>, every: Duration) -> Self {
        let (view, _) = watch::channel(QueueSnapshot::default());
        let shared = Arc::new(Shared {
            source,
            token_no: token_no.into(),
            view,
        });
        let tick_shared = shared.clone();
        let poller = spawn_poll("queue", every, move |_| {
            let shared = tick_shared.clone();
            async move { shared.poll().await }
        });
        Self { shared, poller }
    }

    pub fn token_no(&self) -> &str {
        &self.shared.token_no
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.shared.view.subscribe()
    }

    pub fn latest(&self) -> QueueSnapshot {
        self.shared.view.borrow().clone()
    }

    /// Poll now instead of waiting out the interval.
    pub fn refresh_now(&self) {
        self.poller.wake();
    }

    pub async fn stop(self) {
        self.poller.stop().await;
    }
}
