use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slotclaim::authority::HttpAuthority;
use slotclaim::config::Config;
use slotclaim::queue::QueueWatcher;
use slotclaim::session::{BookingSession, SessionError, SystemClock};
use slotclaim::time::SlotTime;

const SUBMIT_ATTEMPTS: usize = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    slotclaim::observability::init(config.metrics_port)?;

    // Times to book come from argv; without any, the earliest free ones are taken.
    let mut wanted = Vec::new();
    for arg in std::env::args().skip(1) {
        let t = SlotTime::parse_lenient(&arg).ok_or_else(|| format!("not a time of day: {arg}"))?;
        wanted.push(t);
    }

    let timeout = config.settings.submit_timeout.max(config.settings.refresh_timeout);
    let authority = Arc::new(HttpAuthority::new(config.authority_url.clone(), timeout)?);
    let session = BookingSession::new(
        authority.clone(),
        config.visitor.clone(),
        config.party_size,
        config.settings,
        Arc::new(SystemClock),
    )?;

    let date = config.date.unwrap_or_else(|| chrono::Local::now().date_naive());
    info!("slotclaim kiosk against {}", config.authority_url);
    info!("  resource: {} ({})", config.resource.id, config.resource.kind.as_str());
    info!("  date: {date}");
    info!("  party size: {}", config.party_size);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    session.set_target(config.resource.clone(), date).await;
    session.activate().await;
    session.refresh().await?;

    let available = session.available_slots().await;
    println!(
        "available: {}",
        available.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ")
    );
    let picks: Vec<SlotTime> = if wanted.is_empty() {
        available.iter().copied().take(config.party_size).collect()
    } else {
        wanted
    };
    for t in picks {
        if let Err(e) = session.toggle(t).await {
            println!("{t}: {e}");
        }
    }

    let mut attempt = 0;
    let booking = loop {
        attempt += 1;
        match session.submit().await {
            Ok(booking) => break booking,
            Err(e) if e.is_retryable() && attempt < SUBMIT_ATTEMPTS => {
                warn!("attempt {attempt} failed: {e}; retrying");
            }
            Err(e @ SessionError::Conflict { .. }) => {
                println!("{e}");
                println!(
                    "still selected: {}",
                    session
                        .selection()
                        .await
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                );
                session.deactivate().await;
                return Err(e.into());
            }
            Err(e) => {
                session.deactivate().await;
                return Err(e.into());
            }
        }
    };
    session.deactivate().await;

    for appt in &booking.appointments {
        println!("booked {} at {} on {}", appt.id, appt.time, booking.target.date);
    }
    if let Some(group) = &booking.group {
        println!("group {} ({} appointments)", group.id, group.size);
    }

    let Some(token_no) = config.token_no.clone() else {
        return Ok(());
    };
    let watcher = QueueWatcher::start(authority, token_no, config.settings.queue_poll_interval);
    let mut updates = watcher.subscribe();
    info!("watching queue for token {} (ctrl-c to stop)", watcher.token_no());
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                match snapshot.status {
                    Some(status) if status.is_next() => println!("token {}: you're next", status.token_no),
                    Some(status) => println!(
                        "token {}: position {}, wait {}{}",
                        status.token_no,
                        status.position,
                        status.eta_label(),
                        if snapshot.stale { " (stale)" } else { "" }
                    ),
                    None => println!("queue status unavailable: {}", snapshot.error.unwrap_or_default()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
    watcher.stop().await;
    Ok(())
}
