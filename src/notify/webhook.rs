use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::warn;

use crate::notify::sink::{Category, Notification, NotificationSink, NotifyError};
use crate::sanitize::excerpt;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const TITLE_LIMIT: usize = 256;
const FIELD_LIMIT: usize = 1024;
const MAX_FIELDS: usize = 25;

/// Per-channel webhook URLs.
///
/// Moderation falls back to the reports channel, admin to the films channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookUrls {
    pub films: Option<String>,
    pub comments: Option<String>,
    pub likes: Option<String>,
    pub reports: Option<String>,
    pub moderation: Option<String>,
    pub admin: Option<String>,
}

impl WebhookUrls {
    pub fn url_for(&self, category: Category) -> Option<&str> {
        match category {
            Category::Submissions => self.films.as_deref(),
            Category::Comments => self.comments.as_deref(),
            Category::Likes => self.likes.as_deref(),
            Category::Reports => self.reports.as_deref(),
            Category::Moderation => self.moderation.as_deref().or(self.reports.as_deref()),
            Category::Admin => self.admin.as_deref().or(self.films.as_deref()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == WebhookUrls::default()
    }
}

/// Posts each notification as a Discord-style embed.
pub struct WebhookSink {
    client: Client,
    urls: WebhookUrls,
}

impl WebhookSink {
    pub fn new(urls: WebhookUrls, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, urls })
    }
}

fn color(category: Category) -> u32 {
    match category {
        Category::Submissions => 3066993,
        Category::Comments => 3447003,
        Category::Likes => 16776960,
        Category::Reports | Category::Moderation => 15158332,
        Category::Admin => 10181046,
    }
}

fn embed(notification: &Notification) -> Value {
    let fields: Vec<Value> = match &notification.payload {
        Value::Object(map) => map
            .iter()
            .filter_map(|(name, value)| {
                let text = match value {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if text.is_empty() {
                    return None;
                }
                Some(json!({
                    "name": name,
                    "value": excerpt(&text, FIELD_LIMIT),
                    "inline": !value.is_string(),
                }))
            })
            .take(MAX_FIELDS)
            .collect(),
        Value::Null => Vec::new(),
        other => vec![json!({ "name": "details", "value": excerpt(&other.to_string(), FIELD_LIMIT) })],
    };

    json!({
        "embeds": [{
            "title": excerpt(&notification.title, TITLE_LIMIT),
            "color": color(notification.category),
            "fields": fields,
            "timestamp": notification.timestamp.to_rfc3339(),
        }]
    })
}

/// Seconds to wait, from the JSON body's `retry_after` or the `Retry-After` header.
fn retry_after(headers: &HeaderMap, body: &str) -> Option<Duration> {
    let from_body = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(Value::as_f64));
    let from_header = headers
        .get(RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok());
    from_body
        .or(from_header)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

impl NotificationSink for WebhookSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let Some(url) = self.urls.url_for(notification.category) else {
            warn!(category = ?notification.category, "No webhook configured, dropping notification");
            return Ok(());
        };

        let response = self.client.post(url).json(&embed(notification)).send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let headers = response.headers().clone();
        let body = response.text().unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(NotifyError::RateLimited {
                retry_after: retry_after(&headers, &body),
            });
        }
        Err(NotifyError::Delivery(format!(
            "webhook returned {status}: {}",
            excerpt(&body, 200)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{deliver_with_retry, RetryPolicy};
    use chrono::Utc;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};

    fn response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn read_body(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 2048];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                return String::new();
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                return String::from_utf8_lossy(&buf[end + 4..end + 4 + len]).into_owned();
            }
        }
    }

    /// Answers one request per scripted response, recording request bodies.
    fn serve(responses: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let handle = thread::spawn(move || {
            for reply in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let body = read_body(&mut stream);
                recorded.lock().unwrap().push(body);
                stream.write_all(reply.as_bytes()).unwrap();
            }
        });
        (url, seen, handle)
    }

    fn sample() -> Notification {
        Notification {
            category: Category::Reports,
            title: "3 dislikes reached".into(),
            payload: json!({ "threshold": 3, "description": "Fast &amp; Furious (VOSTFR)", "tmdb_id": null }),
            timestamp: Utc::now(),
        }
    }

    fn sink_for_reports(url: String) -> WebhookSink {
        let urls = WebhookUrls {
            reports: Some(url),
            ..WebhookUrls::default()
        };
        WebhookSink::new(urls, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_rate_limit_maps_to_retry_after() {
        let (url, _, handle) = serve(vec![response("429 Too Many Requests", r#"{"retry_after":0.5}"#)]);
        let sink = sink_for_reports(url);

        let err = sink.deliver(&sample()).unwrap_err();
        handle.join().unwrap();

        assert!(matches!(
            err,
            NotifyError::RateLimited { retry_after: Some(d) } if d == Duration::from_millis(500)
        ));
    }

    #[test]
    fn test_rate_limited_delivery_is_retried_until_accepted() {
        let (url, seen, handle) = serve(vec![
            response("429 Too Many Requests", r#"{"retry_after":0.5}"#),
            response("204 No Content", ""),
        ]);
        let sink = sink_for_reports(url);
        let policy = RetryPolicy {
            max_retries: 3,
            max_wait: Duration::from_millis(20),
        };

        deliver_with_retry(&sink, &sample(), &policy).unwrap();
        handle.join().unwrap();

        let bodies = seen.lock().unwrap();
        assert_eq!(bodies.len(), 2);
        let posted: Value = serde_json::from_str(&bodies[1]).unwrap();
        let embed = &posted["embeds"][0];
        assert_eq!(embed["title"], "3 dislikes reached");
        let fields = embed["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields
            .iter()
            .any(|f| f["name"] == "description" && f["value"] == "Fast &amp; Furious (VOSTFR)"));
    }

    #[test]
    fn test_server_error_is_not_a_rate_limit() {
        let (url, _, handle) = serve(vec![response("500 Internal Server Error", r#"{"message":"boom"}"#)]);
        let sink = sink_for_reports(url);

        let err = sink.deliver(&sample()).unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, NotifyError::Delivery(ref m) if m.contains("500")));
    }

    #[test]
    fn test_unconfigured_channel_is_skipped() {
        let sink = WebhookSink::new(WebhookUrls::default(), DEFAULT_TIMEOUT).unwrap();
        assert!(sink.deliver(&sample()).is_ok());
    }

    #[test]
    fn test_channel_fallbacks() {
        let urls = WebhookUrls {
            films: Some("films".into()),
            reports: Some("reports".into()),
            ..WebhookUrls::default()
        };
        assert_eq!(urls.url_for(Category::Moderation), Some("reports"));
        assert_eq!(urls.url_for(Category::Admin), Some("films"));
        assert_eq!(urls.url_for(Category::Submissions), Some("films"));
        assert_eq!(urls.url_for(Category::Likes), None);
        assert!(!urls.is_empty());
        assert!(WebhookUrls::default().is_empty());
    }
}
