//! Chart Signal Relay - pixel watcher for a charting window
//!
//! This crate watches two pixels per configured chart panel and turns colour
//! transitions into HTTP signals:
//!
//! - **Capture**: window-relative pixel sampling and region capture (xcap)
//! - **Detection**: per-target edge detection on the sampled colour pair
//! - **Dispatch**: JSON or multipart delivery to the relay server (reqwest)
//!
//! # Architecture
//!
//! [`MonitorLoop`] samples every target on a fixed tick and hands qualifying
//! transitions to a single dispatch worker over a bounded channel, so slow
//! deliveries never stall sampling.

pub mod capture;
pub mod change_detector;
pub mod color;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod monitor;
pub mod roi;
pub mod types;
pub mod window_tracker;

// Re-export commonly used types
pub use capture::{PixelSampler, RegionCapture, ScreenSource, XcapScreen};
pub use change_detector::{Transition, TransitionDetector};
pub use color::{classify, classify_near, lookup_signal, Classification, NearColor, SignalColor};
pub use config::Config;
pub use dispatcher::{
    run_dispatch_worker, DeliveryCounts, DeliveryResult, SignalDispatcher, SignalEvent, SignalSink,
};
pub use monitor::{MonitorEvent, MonitorLoop, MonitorOptions, TargetStatus, TickReport};
pub use types::{
    CaptureError, CapturePoint, ConfigError, DeliveryError, ObservedState, Point, Rgb, Target,
    WindowAnchor, WindowError,
};
pub use window_tracker::{WindowLocator, XcapWindows};
