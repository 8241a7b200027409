use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::{Appointment, Group, ReservationReceipt, ReservationRequest, Target, VisitorContext};
use crate::time::SlotTime;

use super::{AllocationAuthority, AuthorityError, AvailabilityQuery};

const SOURCE_TAG: &str = "kiosk";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Talks to the kiosk backend's appointment endpoints over HTTP.
#[derive(Clone)]
pub struct HttpAuthority {
    client: Client,
    base_url: String,
}

impl HttpAuthority {
    /// `timeout` bounds every request end to end.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthorityError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthorityError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub(crate) async fn fetch_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AuthorityError> {
        let response = send(request).await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        decode(response).await
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

async fn send(request: RequestBuilder) -> Result<Response, AuthorityError> {
    request.send().await.map_err(|e| {
        if e.is_timeout() {
            AuthorityError::Transport(format!("request timed out: {e}"))
        } else {
            AuthorityError::Transport(e.to_string())
        }
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, AuthorityError> {
    let body = response
        .text()
        .await
        .map_err(|e| AuthorityError::Transport(format!("failed to read body: {e}")))?;
    serde_json::from_str(&body).map_err(|e| AuthorityError::Malformed(e.to_string()))
}

/// Map a non-success response to an error, reading `detail` and, for 409,
/// `conflicts` out of the body when present.
async fn error_from(response: Response) -> AuthorityError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let detail = parsed
        .detail
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| format!("request failed ({})", status.as_u16()));
    if status == StatusCode::CONFLICT {
        AuthorityError::Conflict {
            detail,
            conflicts: parsed.conflicts,
        }
    } else {
        AuthorityError::Rejected {
            status: status.as_u16(),
            detail,
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    conflicts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AvailabilityBody {
    #[serde(default)]
    booked: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Contact<'a> {
    phone: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Details<'a> {
    #[serde(rename = "dateISO")]
    date_iso: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_slot: Option<SlotTime>,
    clinic_name: &'a str,
    specialty: &'a str,
    doctor_id: &'a str,
    doctor_name: &'a str,
    consultation_type: &'static str,
    appointment_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookBody<'a> {
    patient_id: &'a str,
    contact: Contact<'a>,
    #[serde(rename = "appointment_details")]
    appointment_details: Details<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_slots: Option<&'a [SlotTime]>,
    source: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookedOne {
    appointment_id: String,
    #[serde(default)]
    time_slot: Option<String>,
    #[serde(default)]
    group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookedBatch {
    #[serde(default)]
    appointments: Vec<BookedOne>,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    group_size: Option<usize>,
}

fn details<'a>(target: &'a Target, time: Option<SlotTime>) -> Details<'a> {
    let r = &target.resource;
    Details {
        date_iso: target.date.format("%Y-%m-%d").to_string(),
        time_slot: time,
        clinic_name: &r.location,
        specialty: r.specialty.as_deref().unwrap_or(""),
        doctor_id: &r.id,
        doctor_name: &r.name,
        consultation_type: "in-person",
        appointment_type: "walkin",
    }
}

fn contact(visitor: &VisitorContext) -> Contact<'_> {
    Contact {
        phone: &visitor.phone,
        name: visitor.name.as_deref().unwrap_or(""),
    }
}

/// A reported time we cannot parse falls back to the requested one at the
/// same position; a count mismatch is left for the caller to catch.
fn appointment_time(reported: Option<&str>, requested: Option<SlotTime>) -> Result<SlotTime, AuthorityError> {
    match (reported.and_then(SlotTime::parse_lenient), requested) {
        (Some(t), _) => Ok(t),
        (None, Some(t)) => Ok(t),
        (None, None) => Err(AuthorityError::Malformed("appointment without a time".into())),
    }
}

#[async_trait]
impl AllocationAuthority for HttpAuthority {
    async fn read_availability(&self, query: &AvailabilityQuery) -> Result<Vec<String>, AuthorityError> {
        let date = query.date.format("%Y-%m-%d").to_string();
        let request = self
            .client
            .get(self.url("/api/appointments/availability"))
            .header("Cache-Control", "no-store")
            .query(&[
                ("type", query.kind.as_str()),
                ("resourceId", query.resource_id.as_str()),
                ("date", date.as_str()),
            ]);
        let body: AvailabilityBody = self.fetch_json(request).await?;
        Ok(body.booked)
    }

    async fn reserve(&self, request: &ReservationRequest) -> Result<ReservationReceipt, AuthorityError> {
        let target = request.target();
        let visitor = request.visitor();
        let key = request.key().to_string();

        match request {
            ReservationRequest::Single { time, .. } => {
                let body = BookBody {
                    patient_id: &visitor.visitor_id,
                    contact: contact(visitor),
                    appointment_details: details(target, Some(*time)),
                    time_slots: None,
                    source: SOURCE_TAG,
                };
                let http = self
                    .client
                    .post(self.url("/api/appointments/book"))
                    .header(IDEMPOTENCY_HEADER, key)
                    .json(&body);
                let booked: BookedOne = self.fetch_json(http).await?;
                let time = appointment_time(booked.time_slot.as_deref(), Some(*time))?;
                Ok(ReservationReceipt {
                    appointments: vec![Appointment {
                        id: booked.appointment_id,
                        time,
                        group_id: booked.group_id,
                    }],
                    group: None,
                })
            }
            ReservationRequest::Batch { times, .. } => {
                let body = BookBody {
                    patient_id: &visitor.visitor_id,
                    contact: contact(visitor),
                    appointment_details: details(target, None),
                    time_slots: Some(times.as_slice()),
                    source: SOURCE_TAG,
                };
                let http = self
                    .client
                    .post(self.url("/api/appointments/book-batch"))
                    .header(IDEMPOTENCY_HEADER, key)
                    .json(&body);
                let booked: BookedBatch = self.fetch_json(http).await?;

                let group_id = booked
                    .group_id
                    .clone()
                    .or_else(|| booked.appointments.iter().find_map(|a| a.group_id.clone()));
                let appointments = booked
                    .appointments
                    .into_iter()
                    .enumerate()
                    .map(|(i, a)| {
                        let time = appointment_time(a.time_slot.as_deref(), times.get(i).copied())?;
                        Ok(Appointment {
                            id: a.appointment_id,
                            time,
                            group_id: a.group_id.or_else(|| group_id.clone()),
                        })
                    })
                    .collect::<Result<Vec<_>, AuthorityError>>()?;
                let group = group_id.map(|id| Group {
                    id,
                    size: booked.group_size.unwrap_or(appointments.len()),
                });
                Ok(ReservationReceipt { appointments, group })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Resource;
    use chrono::NaiveDate;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let auth = HttpAuthority::with_client(Client::new(), "http://kiosk.local/");
        assert_eq!(auth.url("/api/x"), "http://kiosk.local/api/x");
    }

    #[test]
    fn batch_body_shape() {
        let target = Target {
            resource: Resource::doctor("1", "Dr. Michael Chen", "Downtown Clinic"),
            date: NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(),
        };
        let visitor = VisitorContext {
            visitor_id: "p-9".into(),
            phone: "+919999999999".into(),
            name: None,
        };
        let times = vec![SlotTime::from_hm(9, 0).unwrap(), SlotTime::from_hm(9, 15).unwrap()];
        let body = BookBody {
            patient_id: &visitor.visitor_id,
            contact: contact(&visitor),
            appointment_details: details(&target, None),
            time_slots: Some(times.as_slice()),
            source: SOURCE_TAG,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["patientId"], "p-9");
        assert_eq!(json["appointment_details"]["dateISO"], "2026-02-03");
        assert_eq!(json["appointment_details"]["doctorId"], "1");
        assert!(json["appointment_details"].get("timeSlot").is_none());
        assert_eq!(json["timeSlots"], serde_json::json!(["09:00", "09:15"]));
        assert_eq!(json["source"], "kiosk");
    }

    #[test]
    fn appointment_time_prefers_reported() {
        let req = SlotTime::from_hm(9, 0);
        assert_eq!(appointment_time(Some("9:15 AM"), req).unwrap(), SlotTime::from_hm(9, 15).unwrap());
        assert_eq!(appointment_time(Some("junk"), req).unwrap(), req.unwrap());
        assert!(appointment_time(None, None).is_err());
    }
}
