//! Deriving watched pixels from chart ROI boxes.
//!
//! An ROI box covers one chart panel including its axes. The plot area sits
//! inside fixed margins and is split into `bar_count` equal columns; the two
//! watched pixels are in the last (latest) and second-to-last columns, 4/5 of
//! the way down the plot.

use crate::config::{parse_json, read_file, write_file};
use crate::types::{ConfigError, Point, Target, TargetRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const LEFT_MARGIN: i32 = 10;
const RIGHT_MARGIN: i32 = 81;
const TOP_MARGIN: i32 = 54;
const BOTTOM_MARGIN: i32 = 42;

/// One saved ROI box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiConfig {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    #[serde(default = "default_bar_count")]
    pub bar_count: i32,
}

fn default_bar_count() -> i32 {
    2
}

/// Plot area of the latest bar, in window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Default input file written by the ROI setup step
pub fn default_roi_path() -> PathBuf {
    PathBuf::from("dist").join("config.json")
}

impl RoiConfig {
    /// Column of the latest bar inside the plot area
    pub fn chart_box(&self) -> Result<ChartBox, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRoi {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.bar_count <= 0 {
            return Err(invalid("bar_count must be positive"));
        }

        let out_of_range = || invalid("coordinates out of range");

        let w = self
            .w
            .checked_sub(LEFT_MARGIN + RIGHT_MARGIN)
            .ok_or_else(out_of_range)?
            / self.bar_count;
        let h = self
            .h
            .checked_sub(TOP_MARGIN + BOTTOM_MARGIN)
            .ok_or_else(out_of_range)?;
        if w <= 0 {
            return Err(invalid("too narrow for its margins and bar count"));
        }
        if h <= 0 {
            return Err(invalid("too short for its margins"));
        }

        let x = w
            .checked_mul(self.bar_count - 1)
            .and_then(|offset| offset.checked_add(LEFT_MARGIN))
            .and_then(|offset| self.x.checked_add(offset))
            .ok_or_else(out_of_range)?;
        let y = self.y.checked_add(TOP_MARGIN).ok_or_else(out_of_range)?;

        Ok(ChartBox { x, y, w, h })
    }

    /// point0 in the latest bar, point1 one bar to the left
    pub fn derive_points(&self) -> Result<(Point, Point), ConfigError> {
        let chart = self.chart_box()?;
        let out_of_range = || ConfigError::InvalidRoi {
            name: self.name.clone(),
            reason: "coordinates out of range".to_string(),
        };

        let x0 = chart.x.checked_add(chart.w / 2).ok_or_else(out_of_range)?;
        let y0 = chart
            .h
            .checked_mul(4)
            .and_then(|h| chart.y.checked_add(h / 5))
            .ok_or_else(out_of_range)?;
        let x1 = x0.checked_sub(chart.w).ok_or_else(out_of_range)?;
        Ok((Point::new(x0, y0), Point::new(x1, y0)))
    }

    pub fn to_target(&self) -> Result<Target, ConfigError> {
        let (point0, point1) = self.derive_points()?;
        Ok(Target {
            name: self.name.clone(),
            point0,
            point1,
        })
    }
}

/// Derive one target per ROI, failing on the first invalid box
pub fn derive_targets(rois: &[RoiConfig]) -> Result<Vec<Target>, ConfigError> {
    rois.iter().map(RoiConfig::to_target).collect()
}

pub fn load_rois(path: &Path) -> Result<Vec<RoiConfig>, ConfigError> {
    let rois: Vec<RoiConfig> = parse_json(path, &read_file(path)?)?;
    if rois.is_empty() {
        return Err(ConfigError::NoTargets(path.display().to_string()));
    }
    Ok(rois)
}

/// Write targets as an indented JSON array of `{name, x0, y0, x1, y1}`
pub fn write_targets(path: &Path, targets: &[Target]) -> Result<(), ConfigError> {
    let records: Vec<TargetRecord> = targets.iter().map(TargetRecord::from).collect();

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    records.serialize(&mut ser).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let contents = String::from_utf8_lossy(&buf);
    write_file(path, &contents)?;
    info!("Wrote {} targets to {:?}", records.len(), path);
    Ok(())
}

/// Read ROI boxes from `input` and write derived targets to `output`
pub fn derive_target_file(input: &Path, output: &Path) -> Result<Vec<Target>, ConfigError> {
    let rois = load_rois(input)?;
    let targets = crate::config::validate_targets(derive_targets(&rois)?)?;
    write_targets(output, &targets)?;
    Ok(targets)
}
