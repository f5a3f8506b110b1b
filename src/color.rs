//! Colour classification against the chart's signal palette.
//!
//! Two classifiers live here:
//! - **Exact**: byte-exact lookup in the signal table. This gates dispatch.
//! - **Near**: per-channel tolerance match over a small named palette. Used
//!   only for diagnostics (`probe`), never to decide whether to send.

use crate::types::Rgb;
use lazy_static::lazy_static;
use std::collections::HashMap;

/// Per-channel tolerance used by the diagnostic classifier
pub const DEFAULT_NEAR_TOLERANCE: u8 = 20;

/// A palette entry that carries a trading signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalColor {
    pub rgb: Rgb,
    /// Code sent in the `signal` field
    pub code: &'static str,
    /// Human readable label for logs
    pub label: &'static str,
}

lazy_static! {
    static ref SIGNAL_COLORS: HashMap<Rgb, SignalColor> = {
        let mut m = HashMap::new();
        for entry in [
            SignalColor { rgb: Rgb::new(255, 0, 0), code: "1", label: "red (rise 2)" },
            SignalColor { rgb: Rgb::new(0, 0, 255), code: "2", label: "blue (fall 2)" },
            SignalColor { rgb: Rgb::new(255, 0, 255), code: "3", label: "pink (rise 1)" },
            SignalColor { rgb: Rgb::new(0, 255, 255), code: "4", label: "sky (fall 1)" },
        ] {
            m.insert(entry.rgb, entry);
        }
        m
    };
}

/// Result of the exact classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Signal(&'static SignalColor),
    White,
    Unknown,
}

impl Classification {
    pub fn signal(&self) -> Option<&'static SignalColor> {
        match self {
            Classification::Signal(s) => Some(s),
            _ => None,
        }
    }
}

/// Exact lookup. Only a byte-identical match counts as a signal.
pub fn classify(rgb: Rgb) -> Classification {
    if let Some(entry) = SIGNAL_COLORS.get(&rgb) {
        return Classification::Signal(entry);
    }
    if rgb == Rgb::WHITE {
        Classification::White
    } else {
        Classification::Unknown
    }
}

/// Signal entry for an exact match, if any
pub fn lookup_signal(rgb: Rgb) -> Option<&'static SignalColor> {
    SIGNAL_COLORS.get(&rgb)
}

/// All signal palette entries, ordered by code
pub fn signal_palette() -> Vec<&'static SignalColor> {
    let mut entries: Vec<_> = SIGNAL_COLORS.values().collect();
    entries.sort_by_key(|e| e.code);
    entries
}

/// Named colours recognised by the diagnostic classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NearColor {
    White,
    Red,
    Blue,
    Pink,
    Sky,
    Unknown,
}

impl NearColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            NearColor::White => "white",
            NearColor::Red => "red",
            NearColor::Blue => "blue",
            NearColor::Pink => "pink",
            NearColor::Sky => "sky",
            NearColor::Unknown => "unknown",
        }
    }
}

/// Checked in order; white first so a washed-out background never reads as a signal.
const NEAR_PALETTE: [(NearColor, Rgb); 5] = [
    (NearColor::White, Rgb::new(255, 255, 255)),
    (NearColor::Red, Rgb::new(255, 0, 0)),
    (NearColor::Blue, Rgb::new(0, 0, 255)),
    (NearColor::Pink, Rgb::new(255, 0, 255)),
    (NearColor::Sky, Rgb::new(0, 255, 255)),
];

fn near(a: u8, b: u8, tolerance: u8) -> bool {
    a.abs_diff(b) <= tolerance
}

/// Tolerance match: every channel must be within `tolerance` of the reference.
pub fn classify_near(rgb: Rgb, tolerance: u8) -> NearColor {
    NEAR_PALETTE
        .iter()
        .find(|(_, reference)| {
            near(rgb.r, reference.r, tolerance)
                && near(rgb.g, reference.g, tolerance)
                && near(rgb.b, reference.b, tolerance)
        })
        .map(|(name, _)| *name)
        .unwrap_or(NearColor::Unknown)
}
