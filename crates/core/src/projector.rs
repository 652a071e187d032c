//! Position smoothing.
//!
//! OS media APIs report position at a coarse cadence (often whole seconds)
//! and sometimes resend a stale value while playback is running. The
//! projector keeps an anchor `(position, instant)` per session and
//! extrapolates from it, re-anchoring only when the raw reading disagrees by
//! more than [`CORRECTION_TOLERANCE`] or when state, rate or track changes.

use crate::models::{PlaybackState, RawSnapshot};
use std::time::{Duration, Instant};
use tracing::debug;

/// Largest raw/predicted disagreement absorbed without re-anchoring
pub const CORRECTION_TOLERANCE: Duration = Duration::from_millis(1500);

#[derive(Clone, Debug)]
struct Anchor {
    track_key: String,
    /// Position that was true at `at`
    position: Option<Duration>,
    at: Instant,
    state: PlaybackState,
    rate: f64,
}

impl Anchor {
    fn advances(&self) -> bool {
        self.state.is_playing() && self.rate.is_finite() && self.rate > 0.0
    }

    fn projected(&self, now: Instant) -> Option<Duration> {
        let position = self.position?;
        if !self.advances() {
            return Some(position);
        }
        let elapsed = now.saturating_duration_since(self.at);
        if self.rate == 1.0 {
            return Some(position + elapsed);
        }
        Some(position + elapsed.mul_f64(self.rate))
    }
}

/// Per-session position estimator
#[derive(Debug, Default)]
pub struct PositionProjector {
    anchor: Option<Anchor>,
    duration: Option<Duration>,
}

impl PositionProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimate the current position from a fresh raw snapshot
    pub fn project(&mut self, raw: &RawSnapshot, now: Instant) -> Option<Duration> {
        let track_key = raw.track_key();
        let rate = raw.effective_rate();
        self.duration = raw.duration;

        let anchor = match self.anchor.as_mut() {
            Some(anchor) if anchor.track_key == track_key => anchor,
            _ => {
                debug!("Track changed, anchoring to raw position {:?}", raw.position);
                self.anchor = Some(Anchor {
                    track_key,
                    position: raw.position,
                    at: now,
                    state: raw.state,
                    rate,
                });
                return raw.position;
            }
        };

        let predicted = anchor.projected(now);
        let transport_changed = anchor.state != raw.state || anchor.rate != rate;

        match raw.position {
            Some(raw_position) => {
                if should_anchor_to_raw(raw_position, predicted, transport_changed, raw.state) {
                    anchor.position = Some(raw_position);
                    anchor.at = now;
                }
            }
            None => {
                if predicted.is_some() {
                    anchor.position = predicted;
                    anchor.at = now;
                }
            }
        }

        anchor.state = raw.state;
        anchor.rate = rate;

        let projected = anchor.projected(now);
        self.clamp(projected)
    }

    /// Current estimate without consuming a new reading
    pub fn project_forward(&self, now: Instant) -> Option<Duration> {
        let anchor = self.anchor.as_ref()?;
        self.clamp(anchor.projected(now))
    }

    /// Forget the anchor; the next reading is treated as a new track
    pub fn reset(&mut self) {
        self.anchor = None;
        self.duration = None;
    }

    fn clamp(&self, position: Option<Duration>) -> Option<Duration> {
        match (position, self.duration) {
            // A zero duration marks live streams; there is nothing to clamp to.
            (Some(p), Some(d)) if !d.is_zero() => Some(p.min(d)),
            (p, _) => p,
        }
    }
}

fn should_anchor_to_raw(
    raw: Duration,
    predicted: Option<Duration>,
    transport_changed: bool,
    state: PlaybackState,
) -> bool {
    let Some(predicted) = predicted else {
        return true;
    };
    if transport_changed {
        return true;
    }
    if raw.abs_diff(predicted) > CORRECTION_TOLERANCE {
        return true;
    }
    // Small backward readings while playing are stale samples, not seeks.
    !(state.is_playing() && raw < predicted)
}
