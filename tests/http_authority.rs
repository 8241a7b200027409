//! End-to-end: `HttpAuthority` and `BookingSession` against a fake kiosk
//! backend served by axum on a loopback port.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use slotclaim::authority::{AllocationAuthority, AvailabilityQuery, HttpAuthority};
use slotclaim::config::Settings;
use slotclaim::model::{Resource, ResourceKind, VisitorContext};
use slotclaim::queue::{QueueStatusSource, QueueWatcher};
use slotclaim::session::{BookingSession, FixedClock, SessionError};
use slotclaim::time::SlotTime;

#[derive(Default)]
struct Backend {
    /// Claimed times, spelled the way the backend stores them.
    booked: Mutex<BTreeSet<String>>,
    /// Availability reads as (type, resourceId, date).
    reads: Mutex<Vec<(String, String, String)>>,
    bodies: Mutex<Vec<Value>>,
    idempotency_keys: Mutex<Vec<String>>,
    fail_bookings: AtomicBool,
    next_id: AtomicUsize,
}

impl Backend {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn record(&self, headers: &HeaderMap, body: &Value) {
        self.bodies.lock().await.push(body.clone());
        if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
            self.idempotency_keys.lock().await.push(key.to_string());
        }
    }
}

/// Canonical form for the fake's own bookkeeping.
fn canon(raw: &str) -> String {
    slotclaim::time::canonicalize(raw)
}

async fn availability(State(backend): State<Arc<Backend>>, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    backend.reads.lock().await.push((
        q.get("type").cloned().unwrap_or_default(),
        q.get("resourceId").cloned().unwrap_or_default(),
        q.get("date").cloned().unwrap_or_default(),
    ));
    let booked: Vec<String> = backend.booked.lock().await.iter().cloned().collect();
    Json(json!({ "booked": booked }))
}

async fn book(State(backend): State<Arc<Backend>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    backend.record(&headers, &body).await;
    if backend.fail_bookings.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "detail": "try later" }))).into_response();
    }
    let slot = body["appointment_details"]["timeSlot"].as_str().unwrap_or_default().to_string();
    let mut booked = backend.booked.lock().await;
    if booked.iter().any(|b| canon(b) == canon(&slot)) {
        return (StatusCode::CONFLICT, Json(json!({ "detail": "Slot already booked" }))).into_response();
    }
    booked.insert(slot.clone());
    Json(json!({ "appointmentId": backend.next_id("APT"), "timeSlot": slot, "status": "confirmed" })).into_response()
}

async fn book_batch(State(backend): State<Arc<Backend>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    backend.record(&headers, &body).await;
    let slots: Vec<String> = body["timeSlots"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let mut booked = backend.booked.lock().await;
    let conflicts: Vec<String> = slots
        .iter()
        .filter(|s| booked.iter().any(|b| canon(b) == canon(s)))
        .cloned()
        .collect();
    if !conflicts.is_empty() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "detail": "Some slots are already booked", "conflicts": conflicts })),
        )
            .into_response();
    }
    let group_id = backend.next_id("GRP");
    let appointments: Vec<Value> = slots
        .iter()
        .map(|s| {
            booked.insert(s.clone());
            json!({
                "appointmentId": backend.next_id("APT"),
                "timeSlot": s,
                "groupId": group_id,
                "groupSize": slots.len(),
            })
        })
        .collect();
    Json(json!({ "appointments": appointments, "groupId": group_id, "groupSize": slots.len() })).into_response()
}

async fn queue_status(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    let token = q.get("tokenNo").cloned().unwrap_or_default();
    Json(json!({
        "tokenNo": token,
        "position": 2,
        "etaLow": 10,
        "etaHigh": 15,
        "confidence": 0.7,
        "status": "waiting",
    }))
}

async fn serve(backend: Arc<Backend>) -> String {
    let app = Router::new()
        .route("/api/appointments/availability", get(availability))
        .route("/api/appointments/book", post(book))
        .route("/api/appointments/book-batch", post(book_batch))
        .route("/api/queue/status", get(queue_status))
        .with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 9, 14).unwrap()
}

fn t(s: &str) -> SlotTime {
    SlotTime::parse_strict(s).unwrap()
}

fn doctor() -> Resource {
    Resource {
        specialty: Some("General Medicine".into()),
        ..Resource::doctor("1", "Dr. Michael Chen", "Downtown Clinic")
    }
}

async fn setup(party_size: usize) -> (Arc<Backend>, Arc<HttpAuthority>, Arc<BookingSession>) {
    let backend = Arc::new(Backend::default());
    let url = serve(backend.clone()).await;
    let authority = Arc::new(HttpAuthority::new(url, Duration::from_secs(5)).unwrap());
    let session = BookingSession::new(
        authority.clone(),
        VisitorContext {
            visitor_id: "patient-42".into(),
            phone: "+919876543210".into(),
            name: Some("Asha".into()),
        },
        party_size,
        Settings::default(),
        Arc::new(FixedClock(date().and_hms_opt(7, 30, 0).unwrap())),
    )
    .unwrap();
    session.set_target(doctor(), date()).await;
    (backend, authority, session)
}

#[tokio::test]
async fn availability_read_sends_query_and_normalizes() {
    let (backend, authority, session) = setup(1).await;
    backend
        .booked
        .lock()
        .await
        .extend(["9:15 AM".to_string(), "10:00:00".to_string(), "1:30 pm".to_string(), "??".to_string()]);

    let raw = authority
        .read_availability(&AvailabilityQuery {
            resource_id: "1".into(),
            kind: ResourceKind::Doctor,
            date: date(),
        })
        .await
        .unwrap();
    assert_eq!(raw.len(), 4);

    let claimed = session.refresh().await.unwrap();
    assert_eq!(claimed, vec![t("09:15"), t("10:00"), t("13:30")]);
    assert!(!session.available_slots().await.contains(&t("13:30")));

    let reads = backend.reads.lock().await;
    assert_eq!(reads[0], ("doctor".to_string(), "1".to_string(), "2026-09-14".to_string()));
}

#[tokio::test]
async fn single_booking_round_trip() {
    let (backend, _authority, session) = setup(1).await;
    session.refresh().await.unwrap();
    session.toggle(t("09:00")).await.unwrap();

    let booking = session.submit().await.unwrap();
    assert_eq!(booking.first_appointment_id(), Some("APT-1"));
    assert_eq!(booking.appointments[0].time, t("09:00"));
    assert!(session.selection().await.is_empty());

    let bodies = backend.bodies.lock().await;
    let body = &bodies[0];
    assert_eq!(body["patientId"], "patient-42");
    assert_eq!(body["contact"]["phone"], "+919876543210");
    assert_eq!(body["contact"]["name"], "Asha");
    assert_eq!(body["source"], "kiosk");
    let details = &body["appointment_details"];
    assert_eq!(details["dateISO"], "2026-09-14");
    assert_eq!(details["timeSlot"], "09:00");
    assert_eq!(details["doctorId"], "1");
    assert_eq!(details["doctorName"], "Dr. Michael Chen");
    assert_eq!(details["clinicName"], "Downtown Clinic");
    assert_eq!(details["specialty"], "General Medicine");
    assert_eq!(details["consultationType"], "in-person");
    assert_eq!(details["appointmentType"], "walkin");
    assert_eq!(backend.idempotency_keys.lock().await.len(), 1);
}

#[tokio::test]
async fn single_conflict_prunes_and_reports_generic_message() {
    let (backend, _authority, session) = setup(1).await;
    session.refresh().await.unwrap();
    session.toggle(t("11:00")).await.unwrap();
    backend.booked.lock().await.insert("11:00 AM".into());

    let err = session.submit().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::Conflict {
            times: vec![t("11:00")],
            batch: false
        }
    );
    assert!(session.selection().await.is_empty());
}

#[tokio::test]
async fn batch_conflict_names_times_and_keeps_the_rest() {
    let (backend, _authority, session) = setup(2).await;
    session.refresh().await.unwrap();
    session.toggle(t("10:00")).await.unwrap();
    session.toggle(t("10:15")).await.unwrap();
    backend.booked.lock().await.insert("10:15".into());

    let err = session.submit().await.unwrap_err();
    assert_eq!(err.conflicting_times(), &[t("10:15")]);
    assert!(err.to_string().contains("10:15"));
    assert_eq!(session.selection().await, vec![t("10:00")]);

    // pick another and succeed as one group
    session.toggle(t("10:30")).await.unwrap();
    let booking = session.submit().await.unwrap();
    let group = booking.group.clone().unwrap();
    assert_eq!(group.size, 2);
    assert_eq!(
        booking.appointments.iter().map(|a| a.time).collect::<Vec<_>>(),
        vec![t("10:00"), t("10:30")]
    );
    assert!(booking.appointments.iter().all(|a| a.group_id.as_deref() == Some(group.id.as_str())));

    let bodies = backend.bodies.lock().await;
    assert_eq!(bodies.last().unwrap()["timeSlots"], json!(["10:00", "10:30"]));
}

#[tokio::test]
async fn server_error_is_retryable_and_keeps_selection() {
    let (backend, _authority, session) = setup(1).await;
    session.refresh().await.unwrap();
    session.toggle(t("16:45")).await.unwrap();
    backend.fail_bookings.store(true, Ordering::SeqCst);

    let err = session.submit().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("try later"));
    assert_eq!(session.selection().await, vec![t("16:45")]);

    backend.fail_bookings.store(false, Ordering::SeqCst);
    session.submit().await.unwrap();
    let keys = backend.idempotency_keys.lock().await;
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], keys[1], "retry of the same selection reuses its key");
}

#[tokio::test]
async fn unreachable_backend_first_load_shows_nothing() {
    let authority = Arc::new(HttpAuthority::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap());
    let session = BookingSession::new(
        authority,
        VisitorContext {
            visitor_id: "p".into(),
            phone: String::new(),
            name: None,
        },
        1,
        Settings::default(),
        Arc::new(FixedClock(date().and_hms_opt(7, 0, 0).unwrap())),
    )
    .unwrap();
    session.set_target(doctor(), date()).await;
    assert!(session.refresh().await.is_err());
    assert!(session.available_slots().await.is_empty());
    assert!(session.cache_status().await.error().is_some());
}

#[tokio::test]
async fn queue_status_is_read_and_watched() {
    let (_backend, authority, _session) = setup(1).await;
    let status = authority.queue_status("A-7").await.unwrap();
    assert_eq!(status.token_no, "A-7");
    assert_eq!(status.eta_label(), "10-15 min");

    let watcher = QueueWatcher::start(authority, "A-7", Duration::from_secs(15));
    let mut rx = watcher.subscribe();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().status.as_ref().map(|s| s.position), Some(2));
    watcher.stop().await;
}
