//! Outbound signal delivery.
//!
//! Signals are posted to the relay server either as JSON (`POST /signal`) or,
//! when an image is attached, as a multipart form (`POST /signalimg`). Every
//! request is bounded by a timeout and delivered at most once: failures are
//! logged and counted, never retried.

use crate::color::SignalColor;
use crate::config::ServerConfig;
use crate::monitor::MonitorEvent;
use crate::types::DeliveryError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// `month-day hour:minute:second`, local time
pub const TIMESTAMP_FORMAT: &str = "%m-%d %H:%M:%S";

pub const JSON_ENDPOINT: &str = "/signal";
pub const IMAGE_ENDPOINT: &str = "/signalimg";

/// Snapshot of a qualifying transition, handed from the monitor to the worker
#[derive(Debug, Clone)]
pub struct SignalEvent {
    /// Target name
    pub target: String,
    /// Matched palette entry
    pub signal: &'static SignalColor,
    /// PNG of the target's capture region (image mode only)
    pub image: Option<Vec<u8>>,
    /// When the transition was sampled
    pub observed_at: DateTime<Local>,
}

impl SignalEvent {
    /// Time between sampling and `sent_at`, zero if the clock went backwards
    pub fn queue_delay(&self, sent_at: DateTime<Local>) -> Duration {
        (sent_at - self.observed_at).to_std().unwrap_or_default()
    }
}

/// JSON body for `POST /signal`
#[derive(Debug, Serialize)]
struct SignalPayload<'a> {
    timestamp: String,
    name: &'a str,
    signal: &'a str,
}

/// Outcome of one delivery attempt
#[derive(Debug)]
pub enum DeliveryResult {
    Delivered { status: u16, elapsed: Duration },
    Failed(DeliveryError),
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered { .. })
    }
}

/// Delivery counters
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryCounts {
    pub delivered: u64,
    pub failed: u64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryCounts {
        DeliveryCounts {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &DeliveryResult) {
        let counter = if result.is_delivered() {
            &self.delivered
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Anything that can deliver a signal
#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Deliver one signal. Never fails upward; the outcome is the return value.
    async fn deliver(&self, event: &SignalEvent) -> DeliveryResult;
}

/// HTTP delivery to the relay server
pub struct SignalDispatcher {
    client: reqwest::Client,
    base_url: String,
    json_timeout: Duration,
    image_timeout: Duration,
    stats: Arc<DeliveryStats>,
}

impl SignalDispatcher {
    /// Build a dispatcher posting to `base_url` with the configured timeouts
    pub fn new(base_url: &str, server: &ServerConfig) -> Result<Self, DeliveryError> {
        let connect_timeout = Duration::from_millis(server.connect_timeout_ms);
        let read_timeout = Duration::from_millis(server.read_timeout_ms);
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            json_timeout: Duration::from_millis(server.json_timeout_ms),
            image_timeout: connect_timeout + read_timeout,
            stats: Arc::new(DeliveryStats::default()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        self.stats.clone()
    }

    /// Post one signal, stamping it with the current local time
    pub async fn dispatch(&self, event: &SignalEvent) -> DeliveryResult {
        let now = Local::now();
        let timestamp = format_timestamp(now);
        debug!(
            "{} signal {} sent {:?} after sampling",
            event.target,
            event.signal.code,
            event.queue_delay(now)
        );
        let start = Instant::now();

        let sent = match &event.image {
            Some(png) => self.post_image(event, &timestamp, png.clone()).await,
            None => self.post_json(event, &timestamp).await,
        };

        let result = match sent {
            Ok(status) => DeliveryResult::Delivered {
                status,
                elapsed: start.elapsed(),
            },
            Err(e) => DeliveryResult::Failed(e),
        };

        match &result {
            DeliveryResult::Delivered { status, elapsed } => info!(
                "Sent {} signal {} [{}] ({}{}, {:?})",
                event.target,
                event.signal.code,
                event.signal.label,
                status,
                if event.image.is_some() { ", with image" } else { "" },
                elapsed
            ),
            DeliveryResult::Failed(e) => warn!(
                "Failed to send {} signal {} [{}]: {}",
                event.target, event.signal.code, event.signal.label, e
            ),
        }

        self.stats.record(&result);
        result
    }

    async fn post_json(&self, event: &SignalEvent, timestamp: &str) -> Result<u16, DeliveryError> {
        let payload = SignalPayload {
            timestamp: timestamp.to_string(),
            name: &event.target,
            signal: event.signal.code,
        };

        let url = format!("{}{}", self.base_url, JSON_ENDPOINT);
        debug!("POST {} {:?}", url, payload);

        let resp = self
            .client
            .post(&url)
            .timeout(self.json_timeout)
            .json(&payload)
            .send()
            .await?;

        check_status(resp.status())
    }

    async fn post_image(
        &self,
        event: &SignalEvent,
        timestamp: &str,
        png: Vec<u8>,
    ) -> Result<u16, DeliveryError> {
        let image = reqwest::multipart::Part::bytes(png)
            .file_name(format!("{}.png", event.target))
            .mime_str("image/png")
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("timestamp", timestamp.to_string())
            .text("name", event.target.clone())
            .text("signal", event.signal.code)
            .part("image", image);

        let url = format!("{}{}", self.base_url, IMAGE_ENDPOINT);
        debug!("POST {} (multipart) for {}", url, event.target);

        let resp = self
            .client
            .post(&url)
            .timeout(self.image_timeout)
            .multipart(form)
            .send()
            .await?;

        check_status(resp.status())
    }
}

#[async_trait]
impl SignalSink for SignalDispatcher {
    async fn deliver(&self, event: &SignalEvent) -> DeliveryResult {
        self.dispatch(event).await
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<u16, DeliveryError> {
    if status.is_success() {
        Ok(status.as_u16())
    } else {
        Err(DeliveryError::Status(status.as_u16()))
    }
}

/// Format a send time the way the relay server expects
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Deliver queued signals one at a time until the sending side closes.
///
/// Outcomes are published on `events`; having no subscribers is fine.
pub async fn run_dispatch_worker(
    sink: Arc<dyn SignalSink>,
    mut rx: mpsc::Receiver<SignalEvent>,
    events: broadcast::Sender<MonitorEvent>,
) {
    while let Some(event) = rx.recv().await {
        let outcome = match sink.deliver(&event).await {
            DeliveryResult::Delivered { status, .. } => MonitorEvent::Delivered {
                target: event.target.clone(),
                code: event.signal.code,
                status,
            },
            DeliveryResult::Failed(e) => MonitorEvent::DeliveryFailed {
                target: event.target.clone(),
                code: event.signal.code,
                reason: e.to_string(),
            },
        };
        let _ = events.send(outcome);
    }
    debug!("Dispatch worker stopped: signal channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::lookup_signal;
    use crate::types::Rgb;
    use mockito::Matcher;

    fn red_event(image: Option<Vec<u8>>) -> SignalEvent {
        SignalEvent {
            target: "Gold".to_string(),
            signal: lookup_signal(Rgb::new(255, 0, 0)).unwrap(),
            image,
            observed_at: Local::now(),
        }
    }

    fn fast_server(json_timeout_ms: u64) -> ServerConfig {
        ServerConfig {
            json_timeout_ms,
            connect_timeout_ms: 200,
            read_timeout_ms: 300,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_timestamp_format() {
        let ts = format_timestamp(Local::now());
        let bytes = ts.as_bytes();
        assert_eq!(ts.len(), 14, "{ts}");
        assert_eq!(bytes[2], b'-');
        assert_eq!(bytes[5], b' ');
        assert_eq!(bytes[8], b':');
        assert_eq!(bytes[11], b':');
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let d = SignalDispatcher::new("http://localhost:5000/", &ServerConfig::default()).unwrap();
        assert_eq!(d.base_url(), "http://localhost:5000");
    }

    #[tokio::test]
    async fn test_json_signal_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/signal")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "name": "Gold",
                "signal": "1"
            })))
            .with_status(200)
            .create_async()
            .await;

        let d = SignalDispatcher::new(&server.url(), &ServerConfig::default()).unwrap();
        let result = d.dispatch(&red_event(None)).await;

        assert!(result.is_delivered());
        assert_eq!(d.stats().snapshot(), DeliveryCounts { delivered: 1, failed: 0 });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_json_body_has_timestamp() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/signal")
            .match_body(Matcher::Regex(r#""timestamp":"\d\d-\d\d \d\d:\d\d:\d\d""#.to_string()))
            .with_status(201)
            .create_async()
            .await;

        let d = SignalDispatcher::new(&server.url(), &ServerConfig::default()).unwrap();
        let result = d.dispatch(&red_event(None)).await;

        assert!(matches!(result, DeliveryResult::Delivered { status: 201, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_image_form_fields() {
        let mut server = mockito::Server::new_async().await;
        let re = |pattern: &str| Matcher::Regex(pattern.to_string());
        let mock = server
            .mock("POST", "/signalimg")
            .match_header("content-type", re("multipart/form-data"))
            .match_body(Matcher::AllOf(vec![
                re(r#"name="timestamp"\r\n\r\n\d\d-\d\d \d\d:\d\d:\d\d\r\n"#),
                re(r#"name="name"\r\n\r\nGold\r\n"#),
                re(r#"name="signal"\r\n\r\n1\r\n"#),
                re(r#"name="image"; filename="Gold.png""#),
                re(r"(?i)content-type: image/png\r\n\r\nchart-bytes"),
            ]))
            .with_status(200)
            .create_async()
            .await;

        let d = SignalDispatcher::new(&server.url(), &ServerConfig::default()).unwrap();
        let result = d.dispatch(&red_event(Some(b"chart-bytes".to_vec()))).await;

        assert!(result.is_delivered());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/signal")
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;

        let d = SignalDispatcher::new(&server.url(), &ServerConfig::default()).unwrap();
        let result = d.dispatch(&red_event(None)).await;

        assert!(matches!(
            result,
            DeliveryResult::Failed(DeliveryError::Status(500))
        ));
        assert_eq!(d.stats().snapshot().failed, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        let d = SignalDispatcher::new(&format!("http://{addr}"), &fast_server(200)).unwrap();
        let start = Instant::now();
        let result = d.dispatch(&red_event(None)).await;

        assert!(matches!(result, DeliveryResult::Failed(DeliveryError::Timeout)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_silent_server_times_out_image_upload() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        // JSON budget is far larger; only the image bound (200 + 300 ms) applies
        let d = SignalDispatcher::new(&format!("http://{addr}"), &fast_server(10_000)).unwrap();
        let start = Instant::now();
        let result = d.dispatch(&red_event(Some(b"chart-bytes".to_vec()))).await;

        assert!(matches!(result, DeliveryResult::Failed(DeliveryError::Timeout)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_queue_delay() {
        let event = red_event(None);
        let later = event.observed_at + chrono::Duration::milliseconds(250);
        assert_eq!(event.queue_delay(later), Duration::from_millis(250));

        let earlier = event.observed_at - chrono::Duration::milliseconds(5);
        assert_eq!(event.queue_delay(earlier), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let d = SignalDispatcher::new(&format!("http://{addr}"), &fast_server(500)).unwrap();
        let result = d.dispatch(&red_event(None)).await;

        assert!(!result.is_delivered());
        assert_eq!(d.stats().snapshot(), DeliveryCounts { delivered: 0, failed: 1 });
    }

    struct CountingSink {
        delivered: AtomicU64,
    }

    #[async_trait]
    impl SignalSink for CountingSink {
        async fn deliver(&self, _event: &SignalEvent) -> DeliveryResult {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            DeliveryResult::Delivered {
                status: 200,
                elapsed: Duration::ZERO,
            }
        }
    }

    #[tokio::test]
    async fn test_worker_publishes_outcomes_and_stops_on_close() {
        let sink = Arc::new(CountingSink {
            delivered: AtomicU64::new(0),
        });
        let (tx, rx) = mpsc::channel(4);
        let (events_tx, mut events_rx) = broadcast::channel(8);

        let worker = tokio::spawn(run_dispatch_worker(sink.clone(), rx, events_tx));
        tx.send(red_event(None)).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
        match events_rx.recv().await.unwrap() {
            MonitorEvent::Delivered { target, code, status } => {
                assert_eq!(target, "Gold");
                assert_eq!(code, "1");
                assert_eq!(status, 200);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
