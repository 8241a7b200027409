use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::limits::MIN_POLL_INTERVAL;

/// Why a poll tick ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// First tick after the loop starts (target change / screen entered).
    Start,
    Interval,
    /// The host signalled regained attention, or a caller asked for it.
    Wake,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::Interval => "interval",
            Trigger::Wake => "wake",
        }
    }
}

/// Handle to a running poll loop. Dropping it stops the loop.
pub struct PollHandle {
    cancel: CancellationToken,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Run a tick now and restart the interval from here.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and wait for the current tick, if any, to be abandoned.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Background loop: tick immediately, then every `every`, plus whenever
/// woken. A tick in progress is abandoned as soon as the handle is stopped.
pub fn spawn_poll<F, Fut>(name: &'static str, every: Duration, mut tick: F) -> PollHandle
where
    F: FnMut(Trigger) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let wake = Arc::new(Notify::new());
    let every = every.max(MIN_POLL_INTERVAL);

    let loop_cancel = cancel.clone();
    let loop_wake = wake.clone();
    let task = tokio::spawn(async move {
        metrics::gauge!(crate::observability::POLLERS_ACTIVE).increment(1.0);
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut first = true;
        loop {
            let trigger = tokio::select! {
                biased;
                _ = loop_cancel.cancelled() => break,
                _ = loop_wake.notified() => {
                    interval.reset();
                    Trigger::Wake
                }
                _ = interval.tick() => {
                    if std::mem::take(&mut first) { Trigger::Start } else { Trigger::Interval }
                }
            };
            debug!("{name}: poll tick ({})", trigger.as_str());
            tokio::select! {
                biased;
                _ = loop_cancel.cancelled() => break,
                _ = tick(trigger) => {}
            }
        }
        metrics::gauge!(crate::observability::POLLERS_ACTIVE).decrement(1.0);
        debug!("{name}: poll loop stopped");
    });

    PollHandle {
        cancel,
        wake,
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<Trigger>>>, impl FnMut(Trigger) -> std::future::Ready<()> + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tick = move |t: Trigger| {
            sink.lock().unwrap().push(t);
            std::future::ready(())
        };
        (seen, tick)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_immediately_then_on_interval() {
        let (seen, tick) = recorder();
        let handle = spawn_poll("test", Duration::from_secs(30), tick);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*seen.lock().unwrap(), vec![Trigger::Start]);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(*seen.lock().unwrap(), vec![Trigger::Start, Trigger::Interval]);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wake_runs_a_tick_out_of_band() {
        let (seen, tick) = recorder();
        let handle = spawn_poll("test", Duration::from_secs(30), tick);
        tokio::time::sleep(Duration::from_millis(1)).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.wake();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*seen.lock().unwrap(), vec![Trigger::Start, Trigger::Wake]);

        // interval restarted from the wake, so nothing at t=30s
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(seen.lock().unwrap().last(), Some(&Trigger::Interval));

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_loop() {
        let (seen, tick) = recorder();
        let handle = spawn_poll("test", Duration::from_secs(5), tick);
        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_slow_tick() {
        let done = Arc::new(Mutex::new(false));
        let flag = done.clone();
        let handle = spawn_poll("slow", Duration::from_secs(5), move |_| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(100)).await;
                *flag.lock().unwrap() = true;
            }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(handle.is_running());
        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(!*done.lock().unwrap());
    }
}
