//! Google Calendar backend: payload types, the `CalendarBackend` seam, and a
//! reqwest client against the Calendar v3 REST API.
//!
//! Write operations are submitted as multipart batches (at most
//! [`MAX_BATCH_SIZE`] operations each); parts succeed or fail independently
//! and the client only counts outcomes. A 403 response is treated as a
//! rate-limit signal and retried with exponential backoff before any other
//! error handling applies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BackendError, BackendResult};
use crate::window::TimeWindow;

/// Maximum write operations per batch submission.
pub const MAX_BATCH_SIZE: usize = 100;

/// Rate-limited calls retry up to this many attempts, sleeping 2^n seconds
/// between them.
const MAX_ATTEMPTS: u32 = 5;

/// Private extended-property key carrying the feed entry id. This tag is the
/// reconciliation join key: events without it are never touched.
pub const FEED_ID_PROP: &str = "rssId";

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const BATCH_BASE: &str = "https://www.googleapis.com/batch/calendar/v3";
const BATCH_BOUNDARY: &str = "batch_feedcal";

/// A calendar from the account's calendar list.
#[derive(Debug, Clone, Deserialize)]
pub struct Calendar {
    pub id: String,
    #[serde(default)]
    pub summary: String,
}

/// Start/end sub-structure of an event: a bare date for all-day events or a
/// date-time plus timezone for timed ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedProperties {
    #[serde(default)]
    pub private: HashMap<String, String>,
}

/// The write payload for an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBody {
    pub summary: String,
    pub description: String,
    pub start: EventDateTime,
    pub end: EventDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "extendedProperties")]
    pub extended_properties: ExtendedProperties,
}

/// An event as stored by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct EventResource {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start: Option<EventDateTime>,
    #[serde(default)]
    pub end: Option<EventDateTime>,
    #[serde(rename = "extendedProperties", default)]
    pub extended_properties: Option<ExtendedProperties>,
}

impl EventResource {
    /// The feed entry id this event was created from, if tagged.
    pub fn feed_id(&self) -> Option<&str> {
        self.extended_properties
            .as_ref()
            .and_then(|props| props.private.get(FEED_ID_PROP))
            .map(String::as_str)
    }
}

/// One write operation queued for a batch submission.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Insert(EventBody),
    Update { event_id: String, body: EventBody },
    Delete { event_id: String },
}

/// Per-part outcome counts of one batch submission.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

/// The backend operations the reconciliation engine consumes.
#[async_trait]
pub trait CalendarBackend {
    async fn list_calendars(&self) -> BackendResult<Vec<Calendar>>;

    async fn create_calendar(
        &self,
        summary: &str,
        time_zone: &str,
        owner: &str,
    ) -> BackendResult<Calendar>;

    /// List events, in first-seen pagination order, optionally bounded by a
    /// time window.
    async fn list_events(
        &self,
        calendar_id: &str,
        window: Option<&TimeWindow>,
    ) -> BackendResult<Vec<EventResource>>;

    /// Submit up to [`MAX_BATCH_SIZE`] operations as one batch request.
    async fn execute_batch(
        &self,
        calendar_id: &str,
        ops: &[BatchOp],
    ) -> BackendResult<BatchOutcome>;
}

/// Calendar v3 client.
pub struct GcalClient {
    http: reqwest::Client,
    access_token: String,
    api_base: String,
    batch_base: String,
}

#[derive(Debug, Deserialize)]
struct CalendarListPage {
    #[serde(default)]
    items: Vec<Calendar>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventListPage {
    #[serde(default)]
    items: Vec<EventResource>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CalendarInsertBody<'a> {
    summary: &'a str,
    description: String,
    #[serde(rename = "timeZone")]
    time_zone: &'a str,
}

impl GcalClient {
    pub fn new(http: reqwest::Client, access_token: String) -> Self {
        GcalClient {
            http,
            access_token,
            api_base: API_BASE.to_string(),
            batch_base: BATCH_BASE.to_string(),
        }
    }

    /// Point the client at a different API root (tests).
    #[cfg(test)]
    pub fn with_base_urls(mut self, api_base: &str, batch_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self.batch_base = batch_base.to_string();
        self
    }

    /// Send a request, retrying 403 responses with exponential backoff.
    /// Non-403 error statuses map to `BackendError::Http` immediately.
    async fn send_with_backoff(
        &self,
        request: reqwest::RequestBuilder,
    ) -> BackendResult<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let Some(cloned) = request.try_clone() else {
                return Err(BackendError::Decode("request body not clonable".into()));
            };
            let response = cloned.send().await?;
            let status = response.status();

            if status.as_u16() == 403 {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(BackendError::RateLimited);
                }
                let wait = 1u64 << (attempt - 1);
                eprintln!(
                    "Error 403 during Google API call. Waiting {}s and retrying.",
                    wait
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(BackendError::Http {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response);
        }
    }
}

#[async_trait]
impl CalendarBackend for GcalClient {
    async fn list_calendars(&self) -> BackendResult<Vec<Calendar>> {
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/users/me/calendarList", self.api_base))
                .bearer_auth(&self.access_token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: CalendarListPage = self.send_with_backoff(request).await?.json().await?;
            calendars.extend(page.items);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(calendars)
    }

    async fn create_calendar(
        &self,
        summary: &str,
        time_zone: &str,
        owner: &str,
    ) -> BackendResult<Calendar> {
        let body = CalendarInsertBody {
            summary,
            description: format!("{} Event and Activities", summary),
            time_zone,
        };
        let request = self
            .http
            .post(format!("{}/calendars", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&body);

        let calendar: Calendar = self.send_with_backoff(request).await?.json().await?;

        // Grant the configured account ownership of the new calendar.
        let acl = serde_json::json!({
            "scope": { "type": "user", "value": owner },
            "role": "owner",
        });
        let request = self
            .http
            .post(format!("{}/calendars/{}/acl", self.api_base, calendar.id))
            .bearer_auth(&self.access_token)
            .json(&acl);
        self.send_with_backoff(request).await?;

        Ok(calendar)
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        window: Option<&TimeWindow>,
    ) -> BackendResult<Vec<EventResource>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!(
                    "{}/calendars/{}/events",
                    self.api_base, calendar_id
                ))
                .bearer_auth(&self.access_token);
            if let Some(window) = window {
                request = request.query(&[
                    ("timeMin", window.start_rfc3339()),
                    ("timeMax", window.end_rfc3339()),
                ]);
            }
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: EventListPage = self.send_with_backoff(request).await?.json().await?;
            events.extend(page.items);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(events)
    }

    async fn execute_batch(
        &self,
        calendar_id: &str,
        ops: &[BatchOp],
    ) -> BackendResult<BatchOutcome> {
        if ops.is_empty() {
            return Ok(BatchOutcome::default());
        }
        if ops.len() > MAX_BATCH_SIZE {
            return Err(BackendError::Decode(format!(
                "batch of {} exceeds limit of {}",
                ops.len(),
                MAX_BATCH_SIZE
            )));
        }

        let body = build_batch_body(calendar_id, ops)
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let request = self
            .http
            .post(&self.batch_base)
            .bearer_auth(&self.access_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/mixed; boundary={}", BATCH_BOUNDARY),
            )
            .body(body);

        let text = self.send_with_backoff(request).await?.text().await?;
        Ok(parse_batch_outcome(&text))
    }
}

/// Serialize a batch of operations into a multipart/mixed request body.
fn build_batch_body(calendar_id: &str, ops: &[BatchOp]) -> serde_json::Result<String> {
    let mut body = String::new();

    for (index, op) in ops.iter().enumerate() {
        let (method, path, payload) = match op {
            BatchOp::Insert(event) => (
                "POST",
                format!("/calendar/v3/calendars/{}/events", calendar_id),
                Some(serde_json::to_string(event)?),
            ),
            BatchOp::Update { event_id, body } => (
                "PUT",
                format!("/calendar/v3/calendars/{}/events/{}", calendar_id, event_id),
                Some(serde_json::to_string(body)?),
            ),
            BatchOp::Delete { event_id } => (
                "DELETE",
                format!("/calendar/v3/calendars/{}/events/{}", calendar_id, event_id),
                None,
            ),
        };

        body.push_str(&format!("--{}\r\n", BATCH_BOUNDARY));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <item{}>\r\n\r\n", index + 1));
        body.push_str(&format!("{} {} HTTP/1.1\r\n", method, path));
        match payload {
            Some(json) => {
                body.push_str("Content-Type: application/json\r\n");
                body.push_str(&format!("Content-Length: {}\r\n\r\n", json.len()));
                body.push_str(&json);
                body.push_str("\r\n");
            }
            None => body.push_str("\r\n"),
        }
    }

    body.push_str(&format!("--{}--\r\n", BATCH_BOUNDARY));
    Ok(body)
}

/// Count per-part statuses in a multipart batch response. Parts carry their
/// own HTTP status lines; the outer request succeeding says nothing about
/// the individual operations.
fn parse_batch_outcome(body: &str) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for line in body.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix("HTTP/1.1 ") else {
            continue;
        };
        let code: Option<u16> = rest.split_whitespace().next().and_then(|s| s.parse().ok());
        match code {
            Some(code) if (200..300).contains(&code) => outcome.succeeded += 1,
            Some(_) => outcome.failed += 1,
            None => {}
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_body(summary: &str) -> EventBody {
        EventBody {
            summary: summary.to_string(),
            description: "http://example.org/events/1".to_string(),
            start: EventDateTime {
                date_time: Some("2016-01-17T14:00:00".to_string()),
                time_zone: Some("America/Chicago".to_string()),
                ..Default::default()
            },
            end: EventDateTime {
                date_time: Some("2016-01-17T15:30:00".to_string()),
                time_zone: Some("America/Chicago".to_string()),
                ..Default::default()
            },
            location: None,
            extended_properties: ExtendedProperties {
                private: HashMap::from([(FEED_ID_PROP.to_string(), "evt-1".to_string())]),
            },
        }
    }

    #[test]
    fn test_build_batch_body_shapes_parts() {
        let ops = vec![
            BatchOp::Insert(timed_body("Meeting")),
            BatchOp::Update {
                event_id: "gcal-9".to_string(),
                body: timed_body("Meeting"),
            },
            BatchOp::Delete {
                event_id: "gcal-7".to_string(),
            },
        ];
        let body = build_batch_body("cal-1", &ops).unwrap();

        assert_eq!(body.matches("--batch_feedcal\r\n").count(), 3);
        assert!(body.contains("POST /calendar/v3/calendars/cal-1/events HTTP/1.1"));
        assert!(body.contains("PUT /calendar/v3/calendars/cal-1/events/gcal-9 HTTP/1.1"));
        assert!(body.contains("DELETE /calendar/v3/calendars/cal-1/events/gcal-7 HTTP/1.1"));
        assert!(body.ends_with("--batch_feedcal--\r\n"));
    }

    #[test]
    fn test_parse_batch_outcome_counts_parts_independently() {
        let response = "--batch_abc\r\n\
            Content-Type: application/http\r\n\r\n\
            HTTP/1.1 200 OK\r\n\
            Content-Type: application/json\r\n\r\n\
            {}\r\n\
            --batch_abc\r\n\
            Content-Type: application/http\r\n\r\n\
            HTTP/1.1 409 Conflict\r\n\r\n\
            {}\r\n\
            --batch_abc--\r\n";
        let outcome = parse_batch_outcome(response);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);
    }

    #[test]
    fn test_feed_id_tag_lookup() {
        let resource = EventResource {
            id: "gcal-1".to_string(),
            summary: String::new(),
            description: String::new(),
            start: None,
            end: None,
            extended_properties: Some(ExtendedProperties {
                private: HashMap::from([(FEED_ID_PROP.to_string(), "evt-1".to_string())]),
            }),
        };
        assert_eq!(resource.feed_id(), Some("evt-1"));

        let untagged = EventResource {
            extended_properties: None,
            ..resource
        };
        assert_eq!(untagged.feed_id(), None);
    }

    #[tokio::test]
    async fn test_list_events_follows_pagination() {
        let mut server = mockito::Server::new_async().await;

        let page1 = serde_json::json!({
            "items": [{"id": "e1", "summary": "One"}],
            "nextPageToken": "tok2",
        });
        let page2 = serde_json::json!({
            "items": [{"id": "e2", "summary": "Two"}],
        });

        let first = server
            .mock("GET", "/calendars/cal-1/events")
            .match_query(mockito::Matcher::Regex("^$".to_string()))
            .with_body(page1.to_string())
            .create_async()
            .await;
        let second = server
            .mock("GET", "/calendars/cal-1/events")
            .match_query(mockito::Matcher::UrlEncoded("pageToken".into(), "tok2".into()))
            .with_body(page2.to_string())
            .create_async()
            .await;

        let client = GcalClient::new(reqwest::Client::new(), "token".to_string())
            .with_base_urls(&server.url(), &server.url());
        let events = client.list_events("cal-1", None).await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "e1");
        assert_eq!(events[1].id, "e2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/me/calendarList")
            .with_status(403)
            .with_body("rateLimitExceeded")
            .expect(5)
            .create_async()
            .await;

        let client = GcalClient::new(reqwest::Client::new(), "token".to_string())
            .with_base_urls(&server.url(), &server.url());
        let err = client.list_calendars().await.unwrap_err();

        match err {
            BackendError::RateLimited => {}
            other => panic!("expected RateLimited, got {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_propagates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/me/calendarList")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = GcalClient::new(reqwest::Client::new(), "token".to_string())
            .with_base_urls(&server.url(), &server.url());
        let err = client.list_calendars().await.unwrap_err();

        match err {
            BackendError::Http { status, .. } => assert_eq!(status, 500),
            other => panic!("expected Http error, got {:?}", other),
        }
    }
}
