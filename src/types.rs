//! Core data types for the GeoWake alarm engine.
//!
//! This module defines the fundamental types shared by every engine stage:
//! position fixes coming in, the destination and alarm configuration that
//! describe a trip, and the predicted positions the engine reasons about
//! when fixes stop arriving.
//!
//! Design principle: Types should make intent obvious. If a concept exists,
//! it gets a type. Never pass raw tuples or untyped collections across boundaries.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A single position fix from the platform position source.
///
/// This is the minimal input contract: a WGS84 coordinate, an accuracy
/// estimate and a monotonic timestamp. Heading and speed are optional
/// because many sources only report them while moving.
///
/// Design note: geodesy uses f64. At f32 a single ulp of latitude is
/// already close to a meter, which is the same order as a tight geofence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Latitude in degrees, [-90, 90].
    pub lat: f64,
    /// Longitude in degrees, [-180, 180].
    pub lon: f64,
    /// Horizontal accuracy radius in meters.
    pub accuracy_m: f64,
    /// Course over ground in degrees, if the source reports one.
    pub heading_deg: Option<f64>,
    /// Ground speed in m/s, if the source reports one.
    pub speed_mps: Option<f64>,
    /// Monotonic timestamp in milliseconds. Source of truth for all timing.
    pub timestamp_ms: u64,
}

impl PositionFix {
    /// Creates a fix with only a coordinate and timestamp.
    pub fn new(lat: f64, lon: f64, timestamp_ms: u64) -> Self {
        Self {
            lat,
            lon,
            accuracy_m: 0.0,
            heading_deg: None,
            speed_mps: None,
            timestamp_ms,
        }
    }

    /// Attach a reported speed (m/s). Negative or non-finite speeds are dropped.
    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = (speed_mps.is_finite() && speed_mps >= 0.0).then_some(speed_mps);
        self
    }

    /// Attach a reported heading (degrees).
    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = heading_deg.is_finite().then_some(heading_deg.rem_euclid(360.0));
        self
    }

    /// Attach an accuracy estimate (meters).
    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = accuracy_m;
        self
    }

    /// True when the coordinate is finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        valid_coordinate(self.lat, self.lon)
    }
}

/// Returns true when `lat`/`lon` are finite and inside [-90,90] / [-180,180].
pub fn valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}

/// The place the traveler wants to be woken for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub lat: f64,
    pub lon: f64,
    /// Optional human label ("Central Station").
    pub name: Option<String>,
    /// Geofence radius in meters. Always > 0 once validated.
    pub radius_m: f64,
}

impl Destination {
    pub fn new(lat: f64, lon: f64, radius_m: f64) -> Self {
        Self {
            lat,
            lon,
            name: None,
            radius_m,
        }
    }

    /// Destination using the radius from an alarm configuration.
    pub fn from_config(lat: f64, lon: f64, config: &AlarmConfig) -> Self {
        Self::new(lat, lon, config.radius_m)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Validates coordinates and radius. Never defaults silently.
    pub fn validate(&self) -> Result<()> {
        if !valid_coordinate(self.lat, self.lon) {
            return Err(EngineError::InvalidDestination(format!(
                "coordinate ({}, {}) is not a finite WGS84 position",
                self.lat, self.lon
            )));
        }
        if !(self.radius_m.is_finite() && self.radius_m > 0.0) {
            return Err(EngineError::InvalidDestination(format!(
                "radius must be a positive number of meters, got {}",
                self.radius_m
            )));
        }
        Ok(())
    }
}

/// How hard it is to silence a triggered alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissDifficulty {
    /// Any acknowledgement dismisses.
    #[default]
    Easy,
    /// Solve an arithmetic problem.
    Medium,
    /// Type a phrase back.
    Hard,
    /// Shake the device a number of times.
    Shake,
}

/// Alarm tone family. Each profile caps the volume escalation can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundProfile {
    Soft,
    #[default]
    Loud,
    Gentle,
}

impl SoundProfile {
    /// Highest volume (0..=1) this profile may be driven to.
    pub fn max_volume(&self) -> f32 {
        match self {
            SoundProfile::Soft => 0.5,
            SoundProfile::Loud => 1.0,
            SoundProfile::Gentle => 0.3,
        }
    }
}

/// Vibration pattern family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VibrationProfile {
    Gentle,
    Normal,
    #[default]
    Intense,
    Escalating,
}

impl VibrationProfile {
    /// Vibrate/pause durations in milliseconds.
    pub fn pattern_ms(&self) -> &'static [u32] {
        match self {
            VibrationProfile::Gentle => &[200, 100, 200],
            VibrationProfile::Normal => &[200, 100, 200, 100, 400],
            VibrationProfile::Intense => &[300, 100, 300, 100, 500, 100, 500],
            VibrationProfile::Escalating => &[
                200, 100, 200, 100, 300, 100, 300, 100, 400, 100, 400, 100, 500, 100, 500, 100,
                1000, 100, 1000,
            ],
        }
    }

    /// Length of one full pattern cycle in milliseconds.
    pub fn cycle_ms(&self) -> u64 {
        self.pattern_ms().iter().map(|&d| d as u64).sum()
    }
}

/// Per-trip alarm settings.
///
/// Mutable only while the engine is Idle; the engine rejects changes in
/// any other state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Default geofence radius (meters) for destinations built from this config.
    pub radius_m: f64,
    /// Smart wake lead time in minutes. 0 disables smart wake.
    pub wake_minutes_before: f64,
    pub dismiss_difficulty: DismissDifficulty,
    pub sound_profile: SoundProfile,
    pub vibration_profile: VibrationProfile,
    /// Duration of the volume ramp in seconds. 0 disables escalation.
    pub escalation_seconds: u32,
    pub sound_enabled: bool,
    pub vibration_enabled: bool,
    /// Starting volume before escalation (capped by the sound profile).
    pub initial_volume: f32,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            radius_m: 500.0,
            wake_minutes_before: 0.0,
            dismiss_difficulty: DismissDifficulty::Easy,
            sound_profile: SoundProfile::Loud,
            vibration_profile: VibrationProfile::Intense,
            escalation_seconds: 30,
            sound_enabled: true,
            vibration_enabled: true,
            initial_volume: 0.3,
        }
    }
}

impl AlarmConfig {
    pub fn with_radius(mut self, radius_m: f64) -> Self {
        self.radius_m = radius_m;
        self
    }

    pub fn with_wake_minutes(mut self, minutes: f64) -> Self {
        self.wake_minutes_before = minutes;
        self
    }

    pub fn with_difficulty(mut self, difficulty: DismissDifficulty) -> Self {
        self.dismiss_difficulty = difficulty;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.radius_m.is_finite() && self.radius_m > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "radius_m must be > 0, got {}",
                self.radius_m
            )));
        }
        if !(self.wake_minutes_before.is_finite() && self.wake_minutes_before >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "wake_minutes_before must be >= 0, got {}",
                self.wake_minutes_before
            )));
        }
        if !(self.initial_volume.is_finite() && (0.0..=1.0).contains(&self.initial_volume)) {
            return Err(EngineError::InvalidConfig(format!(
                "initial_volume must be within [0, 1], got {}",
                self.initial_volume
            )));
        }
        Ok(())
    }

    /// Vibration pattern actually played: escalation upgrades to the escalating pattern.
    pub fn effective_vibration(&self) -> VibrationProfile {
        if self.escalation_seconds > 0 {
            VibrationProfile::Escalating
        } else {
            self.vibration_profile
        }
    }

    /// Starting volume clamped to what the sound profile allows.
    pub fn effective_initial_volume(&self) -> f32 {
        self.initial_volume.min(self.sound_profile.max_volume())
    }
}

/// Alarm lifecycle state. Exactly one per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    #[default]
    Idle,
    Armed,
    Triggered,
    Snoozed,
    Dismissed,
}

impl AlarmState {
    /// States during which the position source and keep-alive must run.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AlarmState::Armed | AlarmState::Triggered | AlarmState::Snoozed
        )
    }
}

/// Why the alarm entered Triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// Position fell inside the destination radius.
    Geofence,
    /// Estimated arrival is within the configured lead time.
    SmartWake,
    /// Snooze timer ran out.
    SnoozeExpired,
}

/// An estimated position, possibly extrapolated from the last real fix.
///
/// Ephemeral: recomputed on demand and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedPosition {
    pub lat: f64,
    pub lon: f64,
    /// Trust in this estimate [0.0, 1.0]. 1.0 at a real fix, decays with age.
    pub confidence: f64,
    /// True when the estimate is older than the last real fix.
    pub is_predicted: bool,
    /// Seconds since the last real fix.
    pub age_s: f64,
    /// Speed assumed for the extrapolation (m/s).
    pub speed_mps: f64,
    /// Heading assumed for the extrapolation (degrees).
    pub heading_deg: f64,
}

/// A raw three-axis accelerometer reading, used for the shake challenge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// Monotonic timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Acceleration including gravity [x, y, z] in m/s².
    pub accel: [f32; 3],
}

impl MotionSample {
    pub fn new(timestamp_ms: u64, accel: [f32; 3]) -> Self {
        Self {
            timestamp_ms,
            accel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_validation() {
        assert!(Destination::new(0.0, 0.0, 500.0).validate().is_ok());
        assert!(Destination::new(f64::NAN, 0.0, 500.0).validate().is_err());
        assert!(Destination::new(91.0, 0.0, 500.0).validate().is_err());
        assert!(Destination::new(0.0, -181.0, 500.0).validate().is_err());
        assert!(Destination::new(0.0, 0.0, 0.0).validate().is_err());
        assert!(Destination::new(0.0, 0.0, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_fix_builders_sanitize() {
        let fix = PositionFix::new(1.0, 2.0, 10).with_speed(-3.0).with_heading(-90.0);
        assert_eq!(fix.speed_mps, None);
        assert_eq!(fix.heading_deg, Some(270.0));
        assert!(fix.is_valid());
    }

    #[test]
    fn test_escalation_upgrades_vibration() {
        let config = AlarmConfig::default();
        assert_eq!(config.effective_vibration(), VibrationProfile::Escalating);

        let quiet = AlarmConfig {
            escalation_seconds: 0,
            ..AlarmConfig::default()
        };
        assert_eq!(quiet.effective_vibration(), VibrationProfile::Intense);
    }

    #[test]
    fn test_initial_volume_capped_by_profile() {
        let config = AlarmConfig {
            sound_profile: SoundProfile::Gentle,
            initial_volume: 0.8,
            ..AlarmConfig::default()
        };
        assert!((config.effective_initial_volume() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_config_validation() {
        assert!(AlarmConfig::default().validate().is_ok());
        assert!(AlarmConfig::default().with_wake_minutes(-1.0).validate().is_err());
        assert!(AlarmConfig::default().with_radius(0.0).validate().is_err());
    }

    #[test]
    fn test_vibration_cycle() {
        assert_eq!(VibrationProfile::Gentle.cycle_ms(), 500);
        assert_eq!(VibrationProfile::Intense.cycle_ms(), 1900);
    }
}
