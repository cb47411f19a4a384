//! Dead Reckoning Trajectory Prediction Module.
//!
//! Keeps the alarm evaluating when real fixes stop arriving (tunnels,
//! backgrounded apps, throttled watches) by extrapolating from:
//! - Last known position
//! - Last known speed and heading
//! - Elapsed time since that fix
//!
//! Every estimate carries an explicit confidence that decays with age, so
//! callers can tell a fresh fix from a guess. Confidence only ever falls
//! between real fixes and snaps back to 1.0 when one arrives.

use serde::{Deserialize, Serialize};

use crate::arrival::STATIONARY_SPEED_MPS;
use crate::geo;
use crate::types::{PositionFix, PredictedPosition};

/// Configuration for trajectory prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Beyond this age (s) no extrapolation is attempted.
    pub horizon_s: f64,
    /// Confidence lost per second while moving.
    pub moving_decay_per_s: f64,
    /// Confidence lost per second while stationary.
    pub stationary_decay_per_s: f64,
    /// Continuous GPS loss (s) after which the user should be warned.
    pub degraded_alert_after_s: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            horizon_s: 300.0,
            moving_decay_per_s: 0.1,
            stationary_decay_per_s: 0.05,
            degraded_alert_after_s: 30.0,
        }
    }
}

/// Estimated time to destination from the predicted position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArrivalEstimate {
    pub seconds: f64,
    pub distance_m: f64,
    pub confidence: f64,
}

/// Last real fix the predictor extrapolates from.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    lat: f64,
    lon: f64,
    speed_mps: f64,
    heading_deg: f64,
    timestamp_ms: u64,
}

/// Dead-reckoning predictor.
#[derive(Debug, Clone)]
pub struct TrajectoryPredictor {
    config: PredictorConfig,
    anchor: Option<Anchor>,
    gps_lost_at_ms: Option<u64>,
}

impl TrajectoryPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            anchor: None,
            gps_lost_at_ms: None,
        }
    }

    pub fn default_predictor() -> Self {
        Self::new(PredictorConfig::default())
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Overwrite the anchor with a fresh real fix and clear any GPS-lost mark.
    ///
    /// Unknown speed or heading falls back to 0.
    pub fn update(&mut self, lat: f64, lon: f64, speed_mps: Option<f64>, heading_deg: Option<f64>, timestamp_ms: u64) {
        self.anchor = Some(Anchor {
            lat,
            lon,
            speed_mps: speed_mps.filter(|s| s.is_finite() && *s >= 0.0).unwrap_or(0.0),
            heading_deg: heading_deg.filter(|h| h.is_finite()).map(geo::normalize_bearing).unwrap_or(0.0),
            timestamp_ms,
        });
        self.gps_lost_at_ms = None;
    }

    /// Convenience for feeding a [`PositionFix`] directly.
    pub fn update_fix(&mut self, fix: &PositionFix) {
        self.update(fix.lat, fix.lon, fix.speed_mps, fix.heading_deg, fix.timestamp_ms);
    }

    /// Record that the position source stopped delivering. Idempotent: the
    /// first call wins so the loss duration keeps growing.
    pub fn mark_gps_lost(&mut self, now_ms: u64) {
        if self.gps_lost_at_ms.is_none() {
            self.gps_lost_at_ms = Some(now_ms);
        }
    }

    pub fn mark_gps_restored(&mut self) {
        self.gps_lost_at_ms = None;
    }

    pub fn is_gps_lost(&self) -> bool {
        self.gps_lost_at_ms.is_some()
    }

    /// Seconds of continuous GPS loss, 0 when not lost.
    pub fn time_since_gps_lost(&self, now_ms: u64) -> f64 {
        match self.gps_lost_at_ms {
            Some(lost) => now_ms.saturating_sub(lost) as f64 / 1000.0,
            None => 0.0,
        }
    }

    /// Confidence in the GPS signal itself, 1 unless lost.
    pub fn confidence(&self, now_ms: u64) -> f64 {
        if !self.is_gps_lost() {
            return 1.0;
        }
        (1.0 - self.time_since_gps_lost(now_ms) * self.config.moving_decay_per_s).max(0.0)
    }

    /// GPS has been lost continuously for longer than the alert threshold.
    pub fn should_alert_user(&self, now_ms: u64) -> bool {
        self.is_gps_lost() && self.time_since_gps_lost(now_ms) > self.config.degraded_alert_after_s
    }

    /// Last known speed (m/s), 0 with no anchor.
    pub fn last_speed(&self) -> f64 {
        self.anchor.map(|a| a.speed_mps).unwrap_or(0.0)
    }

    pub fn last_update_ms(&self) -> Option<u64> {
        self.anchor.map(|a| a.timestamp_ms)
    }

    /// Position estimate at `now_ms`, or None before the first fix.
    pub fn predicted_position(&self, now_ms: u64) -> Option<PredictedPosition> {
        let anchor = self.anchor?;
        let age_s = now_ms.saturating_sub(anchor.timestamp_ms) as f64 / 1000.0;
        let is_predicted = age_s > 0.0;

        let at_anchor = |confidence: f64| PredictedPosition {
            lat: anchor.lat,
            lon: anchor.lon,
            confidence,
            is_predicted,
            age_s,
            speed_mps: anchor.speed_mps,
            heading_deg: anchor.heading_deg,
        };

        if age_s > self.config.horizon_s {
            return Some(at_anchor(0.0));
        }

        if anchor.speed_mps < STATIONARY_SPEED_MPS {
            return Some(at_anchor((1.0 - age_s * self.config.stationary_decay_per_s).max(0.0)));
        }

        let travelled_m = anchor.speed_mps * age_s;
        let (lat, lon) = geo::destination_point(anchor.lat, anchor.lon, anchor.heading_deg, travelled_m);

        Some(PredictedPosition {
            lat,
            lon,
            confidence: (1.0 - age_s * self.config.moving_decay_per_s).max(0.0),
            is_predicted,
            age_s,
            speed_mps: anchor.speed_mps,
            heading_deg: anchor.heading_deg,
        })
    }

    /// Time to reach the destination from the predicted position at the last
    /// known speed. None when stationary or before the first fix.
    pub fn estimate_time_to_destination(&self, dest_lat: f64, dest_lon: f64, now_ms: u64) -> Option<ArrivalEstimate> {
        let predicted = self.predicted_position(now_ms)?;
        if predicted.speed_mps < STATIONARY_SPEED_MPS {
            return None;
        }

        let distance_m = geo::distance(predicted.lat, predicted.lon, dest_lat, dest_lon);
        Some(ArrivalEstimate {
            seconds: distance_m / predicted.speed_mps,
            distance_m,
            confidence: predicted.confidence,
        })
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.gps_lost_at_ms = None;
    }
}

impl Default for TrajectoryPredictor {
    fn default() -> Self {
        Self::default_predictor()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_prediction_before_first_fix() {
        let predictor = TrajectoryPredictor::default_predictor();
        assert!(predictor.predicted_position(1000).is_none());
        assert!(predictor.estimate_time_to_destination(0.0, 0.0, 1000).is_none());
    }

    #[test]
    fn test_fresh_fix_full_confidence() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.update(10.0, 20.0, Some(5.0), Some(90.0), 0);

        let p = predictor.predicted_position(0).unwrap();
        assert_eq!(p.confidence, 1.0);
        assert!(!p.is_predicted);
        assert_eq!((p.lat, p.lon), (10.0, 20.0));
    }

    #[test]
    fn test_dead_reckoning_east() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.update(0.0, 0.0, Some(5.0), Some(90.0), 0);

        let p = predictor.predicted_position(10_000).unwrap();
        let moved = geo::distance(0.0, 0.0, p.lat, p.lon);
        assert!((moved - 50.0).abs() < 0.01, "Should be ~50m east, got {}", moved);
        assert!(p.lon > 0.0);
        assert!(p.lat.abs() < 1e-9);
        assert!(p.confidence.abs() < 1e-9, "Confidence should be ~0, got {}", p.confidence);
        assert!(p.is_predicted);
    }

    #[test]
    fn test_confidence_non_increasing() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.update(0.0, 0.0, Some(3.0), Some(0.0), 0);

        let mut last = f64::INFINITY;
        for t in (0..400_000).step_by(500) {
            let c = predictor.predicted_position(t).unwrap().confidence;
            assert!(c <= last, "confidence rose from {} to {} at {}ms", last, c, t);
            assert!((0.0..=1.0).contains(&c));
            last = c;
        }
    }

    #[test]
    fn test_stationary_decays_gently() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.update(1.0, 1.0, Some(0.2), None, 0);

        let p = predictor.predicted_position(10_000).unwrap();
        assert_eq!((p.lat, p.lon), (1.0, 1.0));
        assert!((p.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_beyond_horizon_returns_anchor() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.update(1.0, 1.0, Some(20.0), Some(45.0), 0);

        let p = predictor.predicted_position(301_000).unwrap();
        assert_eq!((p.lat, p.lon), (1.0, 1.0));
        assert_eq!(p.confidence, 0.0);
        assert!(p.is_predicted);
    }

    #[test]
    fn test_real_fix_resets_confidence() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.update(0.0, 0.0, Some(5.0), Some(0.0), 0);
        assert!(predictor.predicted_position(5_000).unwrap().confidence < 1.0);

        predictor.update(0.001, 0.0, Some(5.0), Some(0.0), 5_000);
        assert_eq!(predictor.predicted_position(5_000).unwrap().confidence, 1.0);
    }

    #[test]
    fn test_gps_lost_alert_after_30s() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.update(0.0, 0.0, Some(5.0), Some(0.0), 0);

        predictor.mark_gps_lost(1_000);
        predictor.mark_gps_lost(20_000); // does not restart the clock
        assert!(!predictor.should_alert_user(31_000));
        assert!(predictor.should_alert_user(31_001));
        assert!((predictor.confidence(6_000) - 0.5).abs() < 1e-9);

        predictor.mark_gps_restored();
        assert!(!predictor.should_alert_user(100_000));
        assert_eq!(predictor.confidence(100_000), 1.0);
    }

    #[test]
    fn test_update_clears_gps_lost() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.mark_gps_lost(0);
        predictor.update(0.0, 0.0, None, None, 40_000);
        assert!(!predictor.is_gps_lost());
    }

    #[test]
    fn test_time_to_destination() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        let (lat, lon) = geo::destination_point(0.0, 0.0, 180.0, 1000.0);
        predictor.update(lat, lon, Some(10.0), Some(0.0), 0);

        let eta = predictor.estimate_time_to_destination(0.0, 0.0, 0).unwrap();
        assert!((eta.seconds - 100.0).abs() < 1e-6);
        assert_eq!(eta.confidence, 1.0);

        // Two seconds later the predicted position is 20m closer.
        let eta = predictor.estimate_time_to_destination(0.0, 0.0, 2_000).unwrap();
        assert!((eta.distance_m - 980.0).abs() < 1e-3);
        assert!((eta.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_stationary_has_no_eta() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.update(0.01, 0.0, Some(0.1), None, 0);
        assert!(predictor.estimate_time_to_destination(0.0, 0.0, 0).is_none());
    }

    #[test]
    fn test_reset() {
        let mut predictor = TrajectoryPredictor::default_predictor();
        predictor.update(0.0, 0.0, Some(5.0), Some(90.0), 0);
        predictor.mark_gps_lost(10);
        predictor.reset();
        assert!(predictor.predicted_position(0).is_none());
        assert!(!predictor.is_gps_lost());
        assert_eq!(predictor.last_speed(), 0.0);
    }
}
