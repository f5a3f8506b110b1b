//! One-shot readings for setting up targets.
//!
//! Used by the `probe` command to check coordinates against a live chart
//! without touching the server.

use crate::capture::{PixelSampler, RegionCapture};
use crate::color::{classify, classify_near, Classification};
use crate::types::{CaptureError, CapturePoint, Rgb, Target, WindowAnchor};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Both points of one target, sampled once
#[derive(Debug)]
pub struct ProbeReading {
    pub target: String,
    pub p0: Result<Rgb, CaptureError>,
    pub p1: Result<Rgb, CaptureError>,
    pub tolerance: u8,
}

impl ProbeReading {
    /// Exact classification of point0, if it was read
    pub fn classification(&self) -> Option<Classification> {
        self.p0.as_ref().ok().map(|rgb| classify(*rgb))
    }
}

fn describe(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    reading: &Result<Rgb, CaptureError>,
    tolerance: u8,
) -> fmt::Result {
    match reading {
        Ok(rgb) => write!(f, "{label}={rgb} ~{}", classify_near(*rgb, tolerance).as_str()),
        Err(e) => write!(f, "{label}=<{e}>"),
    }
}

impl fmt::Display for ProbeReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12} ", self.target)?;
        describe(f, "p0", &self.p0, self.tolerance)?;
        write!(f, "  ")?;
        describe(f, "p1", &self.p1, self.tolerance)?;
        match self.classification() {
            Some(Classification::Signal(signal)) => {
                write!(f, "  => signal {} [{}]", signal.code, signal.label)
            }
            Some(Classification::White) => write!(f, "  => white"),
            Some(Classification::Unknown) => write!(f, "  => no signal"),
            None => Ok(()),
        }
    }
}

/// Sample every target once
pub fn probe_targets(
    sampler: &PixelSampler,
    anchor: WindowAnchor,
    targets: &[Target],
    tolerance: u8,
) -> Vec<ProbeReading> {
    targets
        .iter()
        .map(|t| ProbeReading {
            target: t.name.clone(),
            p0: sampler.sample(anchor, t.point0),
            p1: sampler.sample(anchor, t.point1),
            tolerance,
        })
        .collect()
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Write debug images for every target into `dir`.
///
/// Targets with a usable capture region get the region with both points
/// marked; the others get a small patch around each point. Failures are
/// logged and skipped.
pub fn dump_targets(
    capture: &RegionCapture,
    anchor: WindowAnchor,
    targets: &[Target],
    regions: &HashMap<String, CapturePoint>,
    dir: &Path,
) -> Vec<PathBuf> {
    let mut written = Vec::new();

    for target in targets {
        let stem = file_stem(&target.name);
        let results = match regions.get(&target.name).filter(|r| r.is_valid()) {
            Some(region) => vec![capture.save_region(
                anchor,
                region,
                &[target.point0, target.point1],
                &dir.join(format!("{stem}.png")),
            )],
            None => [("p0", target.point0), ("p1", target.point1)]
                .into_iter()
                .map(|(label, point)| {
                    let path = dir.join(format!("{stem}_{label}.png"));
                    capture.save_point_patch(anchor, point, &path)
                })
                .collect(),
        };

        for result in results {
            match result {
                Ok(path) => written.push(path),
                Err(e) => warn!("Could not dump {}: {}", target.name, e),
            }
        }
    }

    written
}
