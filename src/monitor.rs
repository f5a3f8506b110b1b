//! The sampling loop that ties the pipeline together.
//!
//! On every tick each target's two pixels are sampled, fed to the
//! [`TransitionDetector`], and qualifying transitions are snapshotted into a
//! [`SignalEvent`] for the dispatch worker. Delivery never runs on the tick
//! path, so a slow server cannot delay sampling.

use crate::capture::{PixelSampler, RegionCapture, ScreenSource};
use crate::change_detector::TransitionDetector;
use crate::color::SignalColor;
use crate::config::Config;
use crate::dispatcher::SignalEvent;
use crate::types::{CaptureError, CapturePoint, Rgb, Target, WindowAnchor, WindowError};
use crate::window_tracker::{acquire_anchor, WindowLocator};
use chrono::Local;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

/// Capacity of the observer channel
const EVENT_CAPACITY: usize = 256;

/// Things an observer (log view, GUI) may want to show
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A target's colour pair changed
    Transition {
        target: String,
        p0: Rgb,
        p1: Rgb,
        qualifies: bool,
    },
    /// A signal was handed to the dispatch worker
    SignalQueued {
        target: String,
        code: &'static str,
        with_image: bool,
    },
    /// The dispatch queue was full or closed
    SignalDropped { target: String, code: &'static str },
    /// First failed sample after a good one
    SampleFailed { target: String, reason: String },
    /// The window origin was (re)read
    AnchorUpdated { anchor: WindowAnchor },
    /// The server accepted a signal
    Delivered {
        target: String,
        code: &'static str,
        status: u16,
    },
    /// A signal could not be delivered and was dropped
    DeliveryFailed {
        target: String,
        code: &'static str,
        reason: String,
    },
}

/// Loop behaviour that does not change while running
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub image_mode: bool,
    pub window_title: String,
    pub bring_to_front: bool,
    /// `None` keeps the startup anchor for the whole run
    pub reacquire_interval: Option<Duration>,
}

impl MonitorOptions {
    pub fn from_config(config: &Config) -> Self {
        let secs = config.window.reacquire_interval_seconds;
        Self {
            image_mode: config.monitor.image_mode,
            window_title: config.window.title.clone(),
            bring_to_front: config.window.bring_to_front,
            reacquire_interval: (secs > 0).then(|| Duration::from_secs(secs)),
        }
    }
}

/// Per-target bookkeeping. Informational only; suppression lives in the detector.
#[derive(Debug, Clone, Default)]
pub struct TargetStatus {
    /// At least one signal was queued for this target
    pub sent: bool,
    pub signals_queued: u64,
    pub last_signal: Option<&'static str>,
    pub consecutive_failures: u32,
}

/// Counts for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sampled: usize,
    pub failed: usize,
    pub changed: usize,
    pub queued: usize,
    pub dropped: usize,
}

/// Main monitor loop
pub struct MonitorLoop {
    options: MonitorOptions,
    targets: Vec<Target>,
    regions: HashMap<String, CapturePoint>,
    sampler: PixelSampler,
    region_capture: RegionCapture,
    locator: Arc<dyn WindowLocator>,
    detector: TransitionDetector,
    status: HashMap<String, TargetStatus>,
    anchor: WindowAnchor,
    last_anchor_refresh: Instant,
    signal_tx: mpsc::Sender<SignalEvent>,
    events: broadcast::Sender<MonitorEvent>,
    ticks: u64,
}

impl MonitorLoop {
    /// Create a monitor for a validated target list
    pub fn new(
        options: MonitorOptions,
        targets: Vec<Target>,
        regions: HashMap<String, CapturePoint>,
        screen: Arc<dyn ScreenSource>,
        locator: Arc<dyn WindowLocator>,
        signal_tx: mpsc::Sender<SignalEvent>,
    ) -> Self {
        let detector = TransitionDetector::new(&targets);
        let status = targets
            .iter()
            .map(|t| (t.name.clone(), TargetStatus::default()))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            options,
            targets,
            regions,
            sampler: PixelSampler::new(screen.clone()),
            region_capture: RegionCapture::new(screen),
            locator,
            detector,
            status,
            anchor: WindowAnchor::default(),
            last_anchor_refresh: Instant::now(),
            signal_tx,
            events,
            ticks: 0,
        }
    }

    /// Locate the chart window. Must succeed before monitoring starts.
    pub fn init(&mut self) -> Result<WindowAnchor, WindowError> {
        info!(
            "Initializing monitor: {} targets, image mode {}",
            self.targets.len(),
            if self.options.image_mode { "on" } else { "off" }
        );
        self.reacquire_anchor()
    }

    /// Re-read the window origin. On failure the previous anchor is kept.
    pub fn reacquire_anchor(&mut self) -> Result<WindowAnchor, WindowError> {
        self.last_anchor_refresh = Instant::now();
        let anchor = acquire_anchor(
            self.locator.as_ref(),
            &self.options.window_title,
            self.options.bring_to_front,
        )?;
        self.set_anchor(anchor);
        Ok(anchor)
    }

    /// Replace the anchor used to translate target coordinates
    pub fn set_anchor(&mut self, anchor: WindowAnchor) {
        if anchor != self.anchor {
            debug!(
                "Anchor ({}, {}) -> ({}, {})",
                self.anchor.x, self.anchor.y, anchor.x, anchor.y
            );
        }
        self.anchor = anchor;
        let _ = self.events.send(MonitorEvent::AnchorUpdated { anchor });
    }

    fn maybe_reacquire(&mut self) {
        let Some(interval) = self.options.reacquire_interval else {
            return;
        };
        if self.last_anchor_refresh.elapsed() < interval {
            return;
        }
        if let Err(e) = self.reacquire_anchor() {
            warn!(
                "Could not re-anchor to {:?}: {}; keeping previous origin",
                self.options.window_title, e
            );
        }
    }

    /// Run one sampling pass over every target, in configuration order.
    ///
    /// A failure on one target never stops the others.
    pub fn tick(&mut self) -> TickReport {
        self.maybe_reacquire();

        let mut report = TickReport::default();
        let anchor = self.anchor;

        for target in &self.targets {
            let status = self.status.entry(target.name.clone()).or_default();

            let sampled = self
                .sampler
                .sample(anchor, target.point0)
                .and_then(|p0| Ok((p0, self.sampler.sample(anchor, target.point1)?)));

            let (p0, p1) = match sampled {
                Ok(pair) => pair,
                Err(e) => {
                    report.failed += 1;
                    status.consecutive_failures += 1;
                    if status.consecutive_failures == 1 {
                        warn!("Sampling {} failed: {}", target.name, e);
                        let _ = self.events.send(MonitorEvent::SampleFailed {
                            target: target.name.clone(),
                            reason: e.to_string(),
                        });
                    } else {
                        trace!("Sampling {} failed again: {}", target.name, e);
                    }
                    continue;
                }
            };

            if status.consecutive_failures > 0 {
                info!(
                    "Sampling {} recovered after {} failed ticks",
                    target.name, status.consecutive_failures
                );
                status.consecutive_failures = 0;
            }
            report.sampled += 1;

            let transition = self.detector.update(&target.name, p0, p1);
            if !transition.changed {
                continue;
            }
            report.changed += 1;
            let _ = self.events.send(MonitorEvent::Transition {
                target: target.name.clone(),
                p0,
                p1,
                qualifies: transition.qualifies,
            });

            let signal = match transition.signal {
                Some(signal) if transition.should_dispatch() => signal,
                _ => continue,
            };

            let image = if self.options.image_mode {
                capture_signal_image(
                    &self.region_capture,
                    anchor,
                    self.regions.get(&target.name),
                    &target.name,
                )
            } else {
                None
            };

            if queue_signal(&self.signal_tx, &self.events, target, signal, image) {
                report.queued += 1;
                status.sent = true;
                status.signals_queued += 1;
                status.last_signal = Some(signal.code);
            } else {
                report.dropped += 1;
            }
        }

        self.ticks += 1;
        report
    }

    /// Observe loop activity
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Sender half of the observer channel, for the dispatch worker
    pub fn event_sender(&self) -> broadcast::Sender<MonitorEvent> {
        self.events.clone()
    }

    pub fn anchor(&self) -> WindowAnchor {
        self.anchor
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target_status(&self, name: &str) -> Option<&TargetStatus> {
        self.status.get(name)
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }
}

/// PNG for an image-mode signal, or `None` to fall back to a JSON-only signal
fn capture_signal_image(
    capture: &RegionCapture,
    anchor: WindowAnchor,
    region: Option<&CapturePoint>,
    name: &str,
) -> Option<Vec<u8>> {
    let Some(region) = region else {
        warn!("No capture region for {}, sending without image", name);
        return None;
    };

    match capture.capture_png(anchor, region) {
        Ok(png) => Some(png),
        Err(e @ CaptureError::InvalidRegion { .. }) => {
            warn!("Capture region for {} is misconfigured ({}), sending without image", name, e);
            None
        }
        Err(e) => {
            warn!("Capturing {} failed ({}), sending without image", name, e);
            None
        }
    }
}

/// Hand a signal to the worker without waiting. Returns false if it was dropped.
fn queue_signal(
    tx: &mpsc::Sender<SignalEvent>,
    events: &broadcast::Sender<MonitorEvent>,
    target: &Target,
    signal: &'static SignalColor,
    image: Option<Vec<u8>>,
) -> bool {
    let with_image = image.is_some();
    let event = SignalEvent {
        target: target.name.clone(),
        signal,
        image,
        observed_at: Local::now(),
    };

    match tx.try_send(event) {
        Ok(()) => {
            info!(
                "{}: signal {} [{}] queued{}",
                target.name,
                signal.code,
                signal.label,
                if with_image { " with image" } else { "" }
            );
            let _ = events.send(MonitorEvent::SignalQueued {
                target: target.name.clone(),
                code: signal.code,
                with_image,
            });
            true
        }
        Err(TrySendError::Full(_)) => {
            warn!("Dispatch queue full, dropping {} signal {}", target.name, signal.code);
            let _ = events.send(MonitorEvent::SignalDropped {
                target: target.name.clone(),
                code: signal.code,
            });
            false
        }
        Err(TrySendError::Closed(_)) => {
            error!("Dispatch worker is gone, dropping {} signal {}", target.name, signal.code);
            let _ = events.send(MonitorEvent::SignalDropped {
                target: target.name.clone(),
                code: signal.code,
            });
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::SolidScreen;
    use crate::types::Point;
    use crate::window_tracker::tests::FakeWindows;

    fn options(image_mode: bool) -> MonitorOptions {
        MonitorOptions {
            image_mode,
            window_title: "BuJa Chart".to_string(),
            bring_to_front: false,
            reacquire_interval: None,
        }
    }

    fn gold() -> Target {
        Target {
            name: "Gold".to_string(),
            point0: Point::new(10, 10),
            point1: Point::new(5, 10),
        }
    }

    fn monitor(
        color: Rgb,
        image_mode: bool,
        regions: HashMap<String, CapturePoint>,
        capacity: usize,
    ) -> (MonitorLoop, mpsc::Receiver<SignalEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let monitor = MonitorLoop::new(
            options(image_mode),
            vec![gold()],
            regions,
            Arc::new(SolidScreen::new(color)),
            Arc::new(FakeWindows::with("BuJa Chart", WindowAnchor::new(100, 100))),
            tx,
        );
        (monitor, rx)
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        assert!(MonitorOptions::from_config(&config).reacquire_interval.is_none());
        config.window.reacquire_interval_seconds = 30;
        assert_eq!(
            MonitorOptions::from_config(&config).reacquire_interval,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_init_reads_anchor() {
        let (mut m, _rx) = monitor(Rgb::WHITE, false, HashMap::new(), 4);
        assert_eq!(m.init().unwrap(), WindowAnchor::new(100, 100));
        assert_eq!(m.anchor(), WindowAnchor::new(100, 100));
    }

    #[test]
    fn test_signal_queued_once_for_steady_colour() {
        let (mut m, mut rx) = monitor(Rgb::new(255, 0, 0), false, HashMap::new(), 4);
        m.init().unwrap();

        let first = m.tick();
        assert_eq!(first.queued, 1);
        let second = m.tick();
        assert_eq!(second, TickReport { sampled: 1, ..TickReport::default() });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.target, "Gold");
        assert_eq!(event.signal.code, "1");
        assert!(event.image.is_none());
        assert!(rx.try_recv().is_err());

        let status = m.target_status("Gold").unwrap();
        assert!(status.sent);
        assert_eq!(status.last_signal, Some("1"));
        assert_eq!(m.tick_count(), 2);
    }

    #[test]
    fn test_image_mode_attaches_png() {
        let mut regions = HashMap::new();
        regions.insert("Gold".to_string(), CapturePoint::new(0, 0, 20, 20));
        let (mut m, mut rx) = monitor(Rgb::new(0, 0, 255), true, regions, 4);
        m.init().unwrap();

        m.tick();
        let event = rx.try_recv().unwrap();
        let png = event.image.expect("image attached");
        assert_eq!(&png[..4], b"\x89PNG");
    }

    #[test]
    fn test_image_mode_invalid_region_falls_back_to_json() {
        let mut regions = HashMap::new();
        regions.insert("Gold".to_string(), CapturePoint::new(0, 0, 0, 20));
        let (mut m, mut rx) = monitor(Rgb::new(0, 0, 255), true, regions, 4);
        m.init().unwrap();

        assert_eq!(m.tick().queued, 1);
        assert!(rx.try_recv().unwrap().image.is_none());
    }

    #[test]
    fn test_full_queue_drops_signal() {
        let (mut m, _rx) = monitor(Rgb::new(255, 0, 0), false, HashMap::new(), 1);
        m.init().unwrap();
        let mut events = m.subscribe();

        assert_eq!(m.tick().queued, 1);
        // force a second transition while the first is still queued
        m.detector.reset("Gold");
        let report = m.tick();
        assert_eq!(report.queued, 0);
        assert_eq!(report.dropped, 1);

        let mut saw_drop = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, MonitorEvent::SignalDropped { .. }) {
                saw_drop = true;
            }
        }
        assert!(saw_drop);
    }

    #[test]
    fn test_sampling_failure_is_isolated() {
        let (mut m, _rx) = monitor(Rgb::new(255, 0, 0), false, HashMap::new(), 4);
        // negative anchor: SolidScreen reports out of bounds
        m.set_anchor(WindowAnchor::new(-1000, -1000));

        let report = m.tick();
        assert_eq!(report.failed, 1);
        assert_eq!(report.sampled, 0);
        assert_eq!(m.target_status("Gold").unwrap().consecutive_failures, 1);

        m.set_anchor(WindowAnchor::new(0, 0));
        let report = m.tick();
        assert_eq!(report.queued, 1);
        assert_eq!(m.target_status("Gold").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn test_reacquire_follows_window() {
        let wm = Arc::new(FakeWindows::with("BuJa Chart", WindowAnchor::new(0, 0)));
        let (tx, _rx) = mpsc::channel(4);
        let mut opts = options(false);
        opts.reacquire_interval = Some(Duration::ZERO);
        let mut m = MonitorLoop::new(
            opts,
            vec![gold()],
            HashMap::new(),
            Arc::new(SolidScreen::new(Rgb::WHITE)),
            wm.clone(),
            tx,
        );
        m.init().unwrap();

        wm.move_to(WindowAnchor::new(40, 50));
        m.tick();
        assert_eq!(m.anchor(), WindowAnchor::new(40, 50));
    }
}
