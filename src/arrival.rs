//! Speed tracking and arrival estimation.
//!
//! Speed is derived from consecutive real fixes rather than trusted from the
//! source, since many position providers report no speed at all while
//! backgrounded. A short window of samples smooths GPS jitter.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::geo;

/// Number of speed samples kept for averaging.
pub const SPEED_HISTORY_SIZE: usize = 10;

/// Below this speed (m/s) the traveler is considered stationary.
/// Used uniformly: smart-wake gating, prediction, "moving" indicator.
pub const STATIONARY_SPEED_MPS: f64 = 0.5;

/// Derives speed from consecutive fixes.
#[derive(Debug, Clone, Default)]
pub struct SpeedTracker {
    samples: VecDeque<f64>,
    last_position: Option<(f64, f64)>,
    last_timestamp_ms: Option<u64>,
    last_bearing_deg: Option<f64>,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SPEED_HISTORY_SIZE),
            ..Self::default()
        }
    }

    /// Feed a real fix.
    ///
    /// A sample is only recorded when time moved forward; duplicate or
    /// out-of-order timestamps are dropped without touching the window.
    pub fn update(&mut self, lat: f64, lon: f64, timestamp_ms: u64) {
        if let (Some((plat, plon)), Some(prev_ms)) = (self.last_position, self.last_timestamp_ms) {
            if timestamp_ms <= prev_ms {
                return;
            }
            let dt_s = (timestamp_ms - prev_ms) as f64 / 1000.0;
            let dist = geo::distance(plat, plon, lat, lon);
            self.samples.push_back(dist / dt_s);
            if self.samples.len() > SPEED_HISTORY_SIZE {
                self.samples.pop_front();
            }
            if dist > 0.0 {
                self.last_bearing_deg = Some(geo::bearing(plat, plon, lat, lon));
            }
        }

        self.last_position = Some((lat, lon));
        self.last_timestamp_ms = Some(timestamp_ms);
    }

    /// Mean of the sample window, 0 when empty.
    pub fn average_speed(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Most recent sample, 0 when empty.
    pub fn current_speed(&self) -> f64 {
        self.samples.back().copied().unwrap_or(0.0)
    }

    pub fn is_moving(&self) -> bool {
        self.average_speed() > STATIONARY_SPEED_MPS
    }

    /// Bearing of the last displacement between accepted fixes.
    pub fn last_bearing(&self) -> Option<f64> {
        self.last_bearing_deg
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_position = None;
        self.last_timestamp_ms = None;
        self.last_bearing_deg = None;
    }
}

/// Time and distance left to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Eta {
    pub seconds: f64,
    pub distance_m: f64,
}

/// ETA at constant speed, or None when stationary.
pub fn calculate_eta(lat: f64, lon: f64, dest_lat: f64, dest_lon: f64, speed_mps: f64) -> Option<Eta> {
    if !(speed_mps > STATIONARY_SPEED_MPS) {
        return None;
    }
    let distance_m = geo::distance(lat, lon, dest_lat, dest_lon);
    Some(Eta {
        seconds: distance_m / speed_mps,
        distance_m,
    })
}

/// Smart wake fires when the ETA in minutes is within the lead time.
pub fn should_trigger_smart_wake(
    lat: f64,
    lon: f64,
    dest_lat: f64,
    dest_lon: f64,
    speed_mps: f64,
    wake_minutes_before: f64,
) -> bool {
    if wake_minutes_before <= 0.0 {
        return false;
    }
    match calculate_eta(lat, lon, dest_lat, dest_lon, speed_mps) {
        Some(eta) => eta.seconds / 60.0 <= wake_minutes_before,
        None => false,
    }
}

/// Distance covered at `speed_mps` during the smart-wake lead time.
pub fn wake_distance(speed_mps: f64, wake_minutes_before: f64) -> f64 {
    speed_mps * wake_minutes_before * 60.0
}

/// True when the current fix is closer to the destination than the previous one.
pub fn is_moving_toward(prev: (f64, f64), current: (f64, f64), dest: (f64, f64)) -> bool {
    let before = geo::distance(prev.0, prev.1, dest.0, dest.1);
    let now = geo::distance(current.0, current.1, dest.0, dest.1);
    now < before
}

/// "45s", "12min", "1h 5min"; "--:--" when unknown.
pub fn format_eta(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|s| s.is_finite() && *s >= 0.0) else {
        return "--:--".to_string();
    };
    if seconds < 60.0 {
        return format!("{}s", seconds.round() as u64);
    }
    let minutes = (seconds / 60.0).floor() as u64;
    if minutes < 60 {
        return format!("{}min", minutes);
    }
    format!("{}h {}min", minutes / 60, minutes % 60)
}
