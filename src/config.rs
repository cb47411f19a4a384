//! Engine tuning.
//!
//! Every numeric constant the engine uses lives here with its default, so a
//! host can override thresholds from a TOML file without recompiling.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::arrival::STATIONARY_SPEED_MPS;
use crate::challenge::ChallengeConfig;
use crate::error::{EngineError, Result};
use crate::sampler::SamplerConfig;
use crate::trajectory::PredictorConfig;

/// Notification shown when the alarm fires.
pub const NOTIFICATION_TITLE: &str = "GeoWake";
pub const NOTIFICATION_BODY: &str = "You are approaching your destination!";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub predictor: PredictorConfig,
    pub sampler: SamplerConfig,
    pub challenge: ChallengeConfig,
    /// Below this speed (m/s) the traveler counts as stationary.
    pub stationary_speed_mps: f64,
    /// Snooze length used when the caller gives none.
    pub default_snooze_minutes: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            predictor: PredictorConfig::default(),
            sampler: SamplerConfig::default(),
            challenge: ChallengeConfig::default(),
            stationary_speed_mps: STATIONARY_SPEED_MPS,
            default_snooze_minutes: 2.0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.predictor.horizon_s > 0.0) {
            return Err(EngineError::Config("predictor.horizon_s must be > 0".into()));
        }
        if self.predictor.moving_decay_per_s < 0.0 || self.predictor.stationary_decay_per_s < 0.0 {
            return Err(EngineError::Config("predictor decay rates must be >= 0".into()));
        }
        let s = &self.sampler;
        if !(s.distant_threshold_m > s.approaching_threshold_m && s.approaching_threshold_m > s.near_threshold_m) {
            return Err(EngineError::Config(
                "sampler thresholds must satisfy distant > approaching > near".into(),
            ));
        }
        if s.low_power_factor == 0 {
            return Err(EngineError::Config("sampler.low_power_factor must be >= 1".into()));
        }
        if self.challenge.shakes_required == 0 {
            return Err(EngineError::Config("challenge.shakes_required must be >= 1".into()));
        }
        if !(self.default_snooze_minutes > 0.0) {
            return Err(EngineError::Config("default_snooze_minutes must be > 0".into()));
        }
        Ok(())
    }
}
