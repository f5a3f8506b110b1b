//! Edge detection on sampled pixel pairs.
//!
//! Each target remembers the last colour pair seen at its two points. A new
//! sample is a transition only when that pair differs; steady colours never
//! produce a second notification. Signal identity comes from point0 alone.

use crate::color::{lookup_signal, SignalColor};
use crate::types::{ObservedState, Rgb, Target};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Outcome of feeding one sample pair to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// The stored pair differed from this sample (or nothing was stored yet)
    pub changed: bool,
    /// point0 is byte-exact equal to a palette entry
    pub qualifies: bool,
    /// The matched palette entry when `qualifies`
    pub signal: Option<&'static SignalColor>,
}

impl Transition {
    /// A changed sample whose point0 is a signal colour
    pub fn should_dispatch(&self) -> bool {
        self.changed && self.qualifies
    }
}

/// Per-target last-seen colour pairs
pub struct TransitionDetector {
    states: HashMap<String, ObservedState>,
}

impl TransitionDetector {
    /// Create a detector with an `Unset` state for every target
    pub fn new(targets: &[Target]) -> Self {
        let states = targets
            .iter()
            .map(|t| (t.name.clone(), ObservedState::Unset))
            .collect();
        Self { states }
    }

    /// Compare a new sample pair against the stored one.
    ///
    /// A changed pair always replaces the stored one, whether or not it
    /// qualifies. An unchanged pair leaves the store untouched.
    pub fn update(&mut self, name: &str, p0: Rgb, p1: Rgb) -> Transition {
        let next = ObservedState::Observed { p0, p1 };
        let state = self.states.entry(name.to_string()).or_default();

        let changed = *state != next;
        if changed {
            debug!("{}: {:?} -> p0={} p1={}", name, state, p0, p1);
            *state = next;
        } else {
            trace!("{}: unchanged p0={} p1={}", name, p0, p1);
        }

        let signal = lookup_signal(p0);
        Transition {
            changed,
            qualifies: signal.is_some(),
            signal,
        }
    }

    /// Stored state for a target
    pub fn state(&self, name: &str) -> ObservedState {
        self.states.get(name).copied().unwrap_or_default()
    }

    /// Forget a target's pair so the next sample counts as a transition
    pub fn reset(&mut self, name: &str) {
        if let Some(state) = self.states.get_mut(name) {
            *state = ObservedState::Unset;
        }
    }

    /// Number of tracked targets
    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    const RED: Rgb = Rgb::new(255, 0, 0);
    const BLUE: Rgb = Rgb::new(0, 0, 255);
    const WHITE: Rgb = Rgb::WHITE;
    const GREY: Rgb = Rgb::new(128, 128, 128);

    fn detector() -> TransitionDetector {
        TransitionDetector::new(&[Target {
            name: "Gold".to_string(),
            point0: Point::new(1, 1),
            point1: Point::new(2, 2),
        }])
    }

    #[test]
    fn test_first_sample_red_qualifies() {
        let mut d = detector();
        assert_eq!(d.state("Gold"), ObservedState::Unset);

        let t = d.update("Gold", RED, WHITE);
        assert!(t.changed);
        assert!(t.qualifies);
        assert_eq!(t.signal.map(|s| s.code), Some("1"));
        assert_eq!(d.state("Gold"), ObservedState::Observed { p0: RED, p1: WHITE });
    }

    #[test]
    fn test_steady_colour_is_not_a_transition() {
        let mut d = detector();
        assert!(d.update("Gold", RED, WHITE).should_dispatch());

        let t = d.update("Gold", RED, WHITE);
        assert!(!t.changed);
        assert!(!t.should_dispatch());
    }

    #[test]
    fn test_exit_to_white_stores_but_does_not_qualify() {
        let mut d = detector();
        d.update("Gold", RED, WHITE);

        let t = d.update("Gold", WHITE, WHITE);
        assert!(t.changed);
        assert!(!t.qualifies);
        assert!(t.signal.is_none());
        assert_eq!(d.state("Gold"), ObservedState::Observed { p0: WHITE, p1: WHITE });
    }

    #[test]
    fn test_point1_change_alone_marks_changed() {
        let mut d = detector();
        d.update("Gold", GREY, WHITE);

        let t = d.update("Gold", GREY, BLUE);
        assert!(t.changed);
        assert!(!t.qualifies);
    }

    #[test]
    fn test_point1_change_with_signal_on_point0_redispatches() {
        let mut d = detector();
        assert!(d.update("Gold", RED, WHITE).should_dispatch());

        // point0 is still red; only point1 moved, which is a new pair
        let t = d.update("Gold", RED, BLUE);
        assert!(t.changed);
        assert!(t.should_dispatch());
    }

    #[test]
    fn test_changed_matches_tuple_inequality() {
        let colours = [RED, BLUE, WHITE, GREY];
        for &a0 in &colours {
            for &a1 in &colours {
                for &b0 in &colours {
                    for &b1 in &colours {
                        let mut d = detector();
                        d.update("Gold", a0, a1);
                        let t = d.update("Gold", b0, b1);
                        assert_eq!(t.changed, a0 != b0 || a1 != b1);
                    }
                }
            }
        }
    }

    #[test]
    fn test_reset_forces_next_transition() {
        let mut d = detector();
        d.update("Gold", RED, WHITE);
        d.reset("Gold");
        assert!(d.update("Gold", RED, WHITE).changed);
    }

    #[test]
    fn test_unknown_target_is_tracked_on_first_update() {
        let mut d = detector();
        assert!(d.update("Silver", BLUE, WHITE).should_dispatch());
        assert_eq!(d.tracked_count(), 2);
    }
}
