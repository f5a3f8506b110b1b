//! Core types used throughout the signal relay.
//!
//! This module defines the fundamental data structures for targets, sampled
//! colours, window anchoring, and the error taxonomy shared by every stage of
//! the monitor pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A sampled pixel colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(c: [u8; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.r, self.g, self.b)
    }
}

/// Window-relative (or absolute, depending on context) pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One monitored chart/instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Unique name, also sent as the `name` field of a signal
    pub name: String,
    /// Pixel that carries the signal colour
    pub point0: Point,
    /// Companion pixel, only participates in change detection
    pub point1: Point,
}

/// On-disk form of a target: `{name, x0, y0, x1, y1}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    pub name: String,
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl From<TargetRecord> for Target {
    fn from(r: TargetRecord) -> Self {
        Self {
            name: r.name,
            point0: Point::new(r.x0, r.y0),
            point1: Point::new(r.x1, r.y1),
        }
    }
}

impl From<&Target> for TargetRecord {
    fn from(t: &Target) -> Self {
        Self {
            name: t.name.clone(),
            x0: t.point0.x,
            y0: t.point0.y,
            x1: t.point1.x,
            y1: t.point1.y,
        }
    }
}

/// Window-relative capture rectangle attached to a target in image mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturePoint {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl CapturePoint {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_valid(&self) -> bool {
        self.w > 0 && self.h > 0
    }

    /// Translate a window-relative point into this region's own coordinates
    pub fn local(&self, p: Point) -> Point {
        Point::new(p.x - self.x, p.y - self.y)
    }
}

/// On-disk form of a capture region: `{name, x, y, w, h}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Absolute screen origin of the monitored window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowAnchor {
    pub x: i32,
    pub y: i32,
}

impl WindowAnchor {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Translate a window-relative point to screen coordinates.
    ///
    /// Returns `None` on overflow.
    pub fn absolute(&self, p: Point) -> Option<Point> {
        Some(Point::new(self.x.checked_add(p.x)?, self.y.checked_add(p.y)?))
    }
}

/// Last-seen colour pair for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObservedState {
    #[default]
    Unset,
    Observed { p0: Rgb, p1: Rgb },
}

/// Errors in the settings, target, or region files. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("No targets configured in {0}")]
    NoTargets(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Target {name} has a negative coordinate")]
    NegativeCoordinate { name: String },

    #[error("Capture region {0} does not match any target")]
    UnknownTarget(String),

    #[error("Invalid ROI {name}: {reason}")]
    InvalidRoi { name: String, reason: String },

    #[error("Cannot write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the screen-capture capability
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Coordinate ({x}, {y}) is outside every display")]
    OutOfBounds { x: i32, y: i32 },

    #[error("Capture backend failed: {0}")]
    Backend(String),

    #[error("Invalid capture region {width}x{height}")]
    InvalidRegion { width: i32, height: i32 },

    #[error("Image encoding failed: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the window-manager capability
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("No window title contains {0:?}")]
    NotFound(String),

    #[error("Window backend failed: {0}")]
    Backend(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(&'static str),
}

/// Errors from one outbound signal delivery
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("server answered {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request build failed: {0}")]
    Build(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DeliveryError::Timeout
        } else if e.is_connect() {
            DeliveryError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            DeliveryError::Status(status.as_u16())
        } else if e.is_builder() {
            DeliveryError::Build(e.to_string())
        } else {
            DeliveryError::Transport(e.to_string())
        }
    }
}
