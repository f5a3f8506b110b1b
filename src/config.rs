//! Configuration management for the signal relay.
//!
//! Settings come from a TOML file with runtime defaults. The target list and
//! the optional capture regions are separate JSON files, written by the ROI
//! setup step and loaded once at startup.

use crate::types::{CaptureRecord, CapturePoint, ConfigError, Target, TargetRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub window: WindowConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Substring of the chart window title (case-insensitive)
    #[serde(default = "default_window_title")]
    pub title: String,

    /// Raise the window when anchoring
    #[serde(default = "default_true")]
    pub bring_to_front: bool,

    /// Re-read the window origin this often (0 = only at startup)
    #[serde(default)]
    pub reacquire_interval_seconds: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_window_title(),
            bring_to_front: true,
            reacquire_interval_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sampling tick in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Attach a capture of the target region to each signal
    #[serde(default)]
    pub image_mode: bool,

    /// JSON list of `{name, x0, y0, x1, y1}`
    #[serde(default = "default_targets_path")]
    pub targets_path: PathBuf,

    /// JSON list of `{name, x, y, w, h}`, read in image mode only
    #[serde(default = "default_capture_regions_path")]
    pub capture_regions_path: PathBuf,

    /// Signals buffered between the monitor and the dispatch worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            image_mode: false,
            targets_path: default_targets_path(),
            capture_regions_path: default_capture_regions_path(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Relay server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Local server used with `--dev`
    #[serde(default = "default_dev_base_url")]
    pub dev_base_url: String,

    /// Total timeout for a JSON-only signal
    #[serde(default = "default_json_timeout")]
    pub json_timeout_ms: u64,

    /// Connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Longest wait for response data. An image upload is also capped at
    /// `connect_timeout_ms + read_timeout_ms` in total.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            dev_base_url: default_dev_base_url(),
            json_timeout_ms: default_json_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn effective_base_url(&self, dev: bool) -> &str {
        if dev {
            &self.dev_base_url
        } else {
            &self.base_url
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Per-channel tolerance of the near-match classifier
    #[serde(default = "default_near_tolerance")]
    pub near_match_tolerance: u8,

    /// Where `probe --dump` writes images
    #[serde(default = "default_dump_dir")]
    pub dump_dir: PathBuf,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            near_match_tolerance: default_near_tolerance(),
            dump_dir: default_dump_dir(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_window_title() -> String {
    "BuJa Chart".to_string()
}

fn default_tick_interval() -> u64 {
    50
}

fn default_targets_path() -> PathBuf {
    PathBuf::from("dist").join("target.json")
}

fn default_capture_regions_path() -> PathBuf {
    PathBuf::from("dist").join("capture.json")
}

fn default_channel_capacity() -> usize {
    64
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_dev_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_json_timeout() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_read_timeout() -> u64 {
    5000
}

fn default_near_tolerance() -> u8 {
    crate::color::DEFAULT_NEAR_TOLERANCE
}

fn default_dump_dir() -> PathBuf {
    PathBuf::from("dist").join("debug")
}

impl Config {
    /// Read configuration from a specific path.
    ///
    /// `None` when the file does not exist; an unreadable or malformed file is an error.
    pub fn read_from_path(path: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        toml::from_str(&contents)
            .map(Some)
            .map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chart-signal-relay")
            .join("config.toml")
    }

}

pub(crate) fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })
}

pub(crate) fn write_file(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let to_err = |e: std::io::Error| ConfigError::Write {
        path: path.display().to_string(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(to_err)?;
        }
    }
    std::fs::write(path, contents).map_err(to_err)
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    path: &Path,
    contents: &str,
) -> Result<T, ConfigError> {
    serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load and validate the target list.
///
/// The whole file is rejected on any bad record; there is no partial list.
pub fn load_targets(path: &Path) -> Result<Vec<Target>, ConfigError> {
    let records: Vec<TargetRecord> = parse_json(path, &read_file(path)?)?;
    let targets = validate_targets(records.into_iter().map(Target::from).collect())
        .map_err(|e| match e {
            ConfigError::NoTargets(_) => ConfigError::NoTargets(path.display().to_string()),
            other => other,
        })?;
    info!("Loaded {} targets from {:?}", targets.len(), path);
    Ok(targets)
}

/// Check uniqueness and non-negative coordinates
pub fn validate_targets(targets: Vec<Target>) -> Result<Vec<Target>, ConfigError> {
    if targets.is_empty() {
        return Err(ConfigError::NoTargets(String::new()));
    }

    let mut seen = HashSet::new();
    for target in &targets {
        if !seen.insert(target.name.as_str()) {
            return Err(ConfigError::DuplicateName(target.name.clone()));
        }
        let coords = [
            target.point0.x,
            target.point0.y,
            target.point1.x,
            target.point1.y,
        ];
        if coords.iter().any(|c| *c < 0) {
            return Err(ConfigError::NegativeCoordinate {
                name: target.name.clone(),
            });
        }
    }

    Ok(targets)
}

/// Load capture regions keyed by target name.
///
/// Names must be unique and refer to a known target. Non-positive sizes are
/// kept (and warned about); they are rejected when a capture is attempted.
pub fn load_capture_regions(
    path: &Path,
    targets: &[Target],
) -> Result<HashMap<String, CapturePoint>, ConfigError> {
    let records: Vec<CaptureRecord> = parse_json(path, &read_file(path)?)?;
    let known: HashSet<&str> = targets.iter().map(|t| t.name.as_str()).collect();

    let mut regions = HashMap::new();
    for record in records {
        if !known.contains(record.name.as_str()) {
            return Err(ConfigError::UnknownTarget(record.name));
        }
        let region = CapturePoint::new(record.x, record.y, record.w, record.h);
        if !region.is_valid() {
            warn!(
                "Capture region {} has size {}x{}; signals will be sent without an image",
                record.name, record.w, record.h
            );
        }
        if regions.insert(record.name.clone(), region).is_some() {
            return Err(ConfigError::DuplicateName(record.name));
        }
    }

    for target in targets {
        if !regions.contains_key(&target.name) {
            warn!(
                "No capture region for {}; its signals will be sent without an image",
                target.name
            );
        }
    }

    info!("Loaded {} capture regions from {:?}", regions.len(), path);
    Ok(regions)
}
