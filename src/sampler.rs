/// Battery-aware position sampling.
///
/// Decides how often the platform should be asked for a position and keeps
/// positions flowing when the host OS throttles the push stream.
///
/// - Distance bands (60s/30s/10s/continuous as the destination nears)
/// - Low-power mode doubles every interval
/// - Staleness watchdog issuing one-shot fallback polls
/// - Foreground re-sync: restart the watch and poll once on resume

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Sampling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Beyond this distance (m) the trip is `Distant`.
    pub distant_threshold_m: f64,
    /// Beyond this distance (m) the trip is `Approaching`.
    pub approaching_threshold_m: f64,
    /// Beyond this distance (m) the trip is `Near`; inside it is `Imminent`.
    pub near_threshold_m: f64,
    pub distant_interval_ms: u64,
    pub approaching_interval_ms: u64,
    pub near_interval_ms: u64,
    /// Nominal spacing of the continuous stream, used when low power forces polling.
    pub continuous_interval_ms: u64,
    /// Interval multiplier in low-power mode.
    pub low_power_factor: u64,
    /// No fix for this long (ms) counts as stale.
    pub stale_after_ms: u64,
    /// While stale, repeat the fallback poll this often (ms).
    pub stale_repoll_ms: u64,
    /// Expected keep-alive heartbeat spacing (ms).
    pub heartbeat_ms: u64,
    /// Battery fraction below which low power turns on automatically.
    pub low_battery_threshold: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            distant_threshold_m: 5000.0,
            approaching_threshold_m: 1000.0,
            near_threshold_m: 500.0,
            distant_interval_ms: 60_000,
            approaching_interval_ms: 30_000,
            near_interval_ms: 10_000,
            continuous_interval_ms: 5_000,
            low_power_factor: 2,
            stale_after_ms: 15_000,
            stale_repoll_ms: 10_000,
            heartbeat_ms: 10_000,
            low_battery_threshold: 0.2,
        }
    }
}

/// Distance band relative to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingBand {
    /// More than 5 km out - poll every 60s
    Distant,
    /// 1-5 km - poll every 30s
    Approaching,
    /// 500 m - 1 km - poll every 10s
    Near,
    /// Inside 500 m - continuous stream
    Imminent,
}

impl SamplingBand {
    pub fn from_distance(distance_m: f64, config: &SamplerConfig) -> Self {
        if distance_m > config.distant_threshold_m {
            SamplingBand::Distant
        } else if distance_m > config.approaching_threshold_m {
            SamplingBand::Approaching
        } else if distance_m > config.near_threshold_m {
            SamplingBand::Near
        } else {
            SamplingBand::Imminent
        }
    }

    /// Polling interval in normal power mode, None for continuous.
    pub fn base_interval_ms(&self, config: &SamplerConfig) -> Option<u64> {
        match self {
            SamplingBand::Distant => Some(config.distant_interval_ms),
            SamplingBand::Approaching => Some(config.approaching_interval_ms),
            SamplingBand::Near => Some(config.near_interval_ms),
            SamplingBand::Imminent => None,
        }
    }

    pub fn cadence(&self, power: PowerMode, config: &SamplerConfig) -> Cadence {
        match (self.base_interval_ms(config), power) {
            (None, PowerMode::Normal) => Cadence::Continuous,
            (None, PowerMode::LowPower) => {
                Cadence::Interval(config.continuous_interval_ms * config.low_power_factor)
            }
            (Some(ms), PowerMode::Normal) => Cadence::Interval(ms),
            (Some(ms), PowerMode::LowPower) => Cadence::Interval(ms * config.low_power_factor),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    #[default]
    Normal,
    LowPower,
}

/// How the position source should deliver fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Push-driven, as fast as the platform delivers.
    Continuous,
    /// One fix every N milliseconds.
    Interval(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollReason {
    /// No fix within the staleness window.
    Stale,
    /// App came back to the foreground.
    Foreground,
}

/// Something the engine must ask the position source to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerAction {
    /// Request a single fix outside the push stream.
    OneShotPoll(PollReason),
    /// Tear down and re-create the push stream.
    RestartWatch,
    /// Switch the delivery cadence.
    SetCadence(Cadence),
}

/// Rough trip battery cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryEstimate {
    /// Expected battery use in percent, rounded.
    pub percent: u32,
    /// Expected trip duration in hours.
    pub hours: f64,
    /// Battery unknown, or more than 10 points of margin left.
    pub enough_battery: bool,
}

/// Adaptive position sampler.
pub struct AdaptiveSampler {
    config: SamplerConfig,
    power_mode: PowerMode,
    band: Option<SamplingBand>,

    // Watchdog state
    watching: bool,
    started_ms: u64,
    last_fix_ms: Option<u64>,
    last_fallback_ms: Option<u64>,
    stale: bool,
    foreground: bool,

    // Battery
    battery_level: Option<f32>,
    charging: Option<bool>,

    // Counters
    fallback_polls: u64,
    restarts: u64,
}

impl AdaptiveSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            power_mode: PowerMode::Normal,
            band: None,
            watching: false,
            started_ms: 0,
            last_fix_ms: None,
            last_fallback_ms: None,
            stale: false,
            foreground: true,
            battery_level: None,
            charging: None,
            fallback_polls: 0,
            restarts: 0,
        }
    }

    /// Begin supervising a fresh push stream.
    pub fn start(&mut self, now_ms: u64) {
        self.watching = true;
        self.started_ms = now_ms;
        self.last_fix_ms = None;
        self.last_fallback_ms = None;
        self.stale = false;
        self.band = None;
    }

    /// Stop supervising. Power mode and battery state survive.
    pub fn stop(&mut self) {
        self.watching = false;
        self.band = None;
        self.stale = false;
        self.last_fix_ms = None;
        self.last_fallback_ms = None;
    }

    /// Record a real fix at `distance_m` from the destination.
    ///
    /// Returns a cadence change when the distance band moved.
    pub fn on_fix(&mut self, timestamp_ms: u64, distance_m: f64) -> Option<SamplerAction> {
        self.last_fix_ms = Some(self.last_fix_ms.map_or(timestamp_ms, |t| t.max(timestamp_ms)));
        if self.stale {
            info!("position stream recovered");
            self.stale = false;
        }
        self.last_fallback_ms = None;

        let band = SamplingBand::from_distance(distance_m, &self.config);
        if self.band == Some(band) {
            return None;
        }
        debug!(?band, distance_m, "sampling band changed");
        self.band = Some(band);
        Some(SamplerAction::SetCadence(band.cadence(self.power_mode, &self.config)))
    }

    /// Staleness watchdog. Driven by the keep-alive heartbeat and the
    /// engine's timer ticks so it keeps running when host timers are throttled.
    pub fn on_tick(&mut self, now_ms: u64) -> Option<SamplerAction> {
        if !self.watching || !self.is_stale(now_ms) {
            return None;
        }
        if !self.stale {
            warn!(
                silent_ms = now_ms.saturating_sub(self.reference_ms()),
                "position stream stale, falling back to one-shot polls"
            );
            self.stale = true;
        }

        let due = match self.last_fallback_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.config.stale_repoll_ms,
        };
        if !due {
            return None;
        }
        self.last_fallback_ms = Some(now_ms);
        self.fallback_polls += 1;
        Some(SamplerAction::OneShotPoll(PollReason::Stale))
    }

    /// Foreground/background transition. Mobile OSes throttle or kill
    /// watches in the background, so resuming restarts the stream and
    /// polls once immediately.
    pub fn on_visibility(&mut self, visible: bool, now_ms: u64) -> Vec<SamplerAction> {
        let resumed = visible && !self.foreground;
        self.foreground = visible;
        if !resumed || !self.watching {
            return Vec::new();
        }
        info!("foreground resume, re-syncing position stream");
        self.restarts += 1;
        self.last_fallback_ms = Some(now_ms);
        let mut actions = vec![
            SamplerAction::RestartWatch,
            SamplerAction::OneShotPoll(PollReason::Foreground),
        ];
        if let Some(band) = self.band {
            actions.push(SamplerAction::SetCadence(band.cadence(self.power_mode, &self.config)));
        }
        actions
    }

    /// No fix within the staleness window.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        self.watching && now_ms.saturating_sub(self.reference_ms()) >= self.config.stale_after_ms
    }

    pub fn set_power_mode(&mut self, mode: PowerMode) -> Option<SamplerAction> {
        if self.power_mode == mode {
            return None;
        }
        info!(?mode, "power mode changed");
        self.power_mode = mode;
        self.band
            .map(|band| SamplerAction::SetCadence(band.cadence(mode, &self.config)))
    }

    /// Battery telemetry. Low battery while unplugged forces low-power mode.
    pub fn update_battery(&mut self, level: f32, charging: bool) -> Option<SamplerAction> {
        self.battery_level = Some(level.clamp(0.0, 1.0));
        self.charging = Some(charging);
        if level < self.config.low_battery_threshold && !charging {
            self.set_power_mode(PowerMode::LowPower)
        } else {
            None
        }
    }

    /// Battery cost of a trip: GPS tracking burns roughly 7%/h (3%/h in low power).
    pub fn estimate_battery_usage(&self, distance_km: f64, avg_speed_kmh: f64) -> Option<BatteryEstimate> {
        if !(avg_speed_kmh > 0.0) || !distance_km.is_finite() {
            return None;
        }
        let hours = distance_km / avg_speed_kmh;
        let per_hour = match self.power_mode {
            PowerMode::Normal => 7.0,
            PowerMode::LowPower => 3.0,
        };
        let percent = hours * per_hour;
        let enough_battery = match self.battery_level {
            None => true,
            Some(level) => level as f64 * 100.0 > percent + 10.0,
        };
        Some(BatteryEstimate {
            percent: percent.round().max(0.0) as u32,
            hours,
            enough_battery,
        })
    }

    pub fn power_mode(&self) -> PowerMode {
        self.power_mode
    }

    pub fn band(&self) -> Option<SamplingBand> {
        self.band
    }

    /// Cadence currently requested, None before the first fix.
    pub fn cadence(&self) -> Option<Cadence> {
        self.band.map(|b| b.cadence(self.power_mode, &self.config))
    }

    pub fn is_watching(&self) -> bool {
        self.watching
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn fallback_polls(&self) -> u64 {
        self.fallback_polls
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    fn reference_ms(&self) -> u64 {
        self.last_fix_ms.unwrap_or(self.started_ms)
    }
}

impl Default for AdaptiveSampler {
    fn default() -> Self {
        Self::new(SamplerConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_thresholds() {
        let c = SamplerConfig::default();
        assert_eq!(SamplingBand::from_distance(8000.0, &c), SamplingBand::Distant);
        assert_eq!(SamplingBand::from_distance(5000.0, &c), SamplingBand::Approaching);
        assert_eq!(SamplingBand::from_distance(1000.0, &c), SamplingBand::Near);
        assert_eq!(SamplingBand::from_distance(500.0, &c), SamplingBand::Imminent);
        assert_eq!(SamplingBand::from_distance(0.0, &c), SamplingBand::Imminent);
    }

    #[test]
    fn test_band_cadences() {
        let c = SamplerConfig::default();
        assert_eq!(SamplingBand::Distant.cadence(PowerMode::Normal, &c), Cadence::Interval(60_000));
        assert_eq!(SamplingBand::Approaching.cadence(PowerMode::Normal, &c), Cadence::Interval(30_000));
        assert_eq!(SamplingBand::Near.cadence(PowerMode::Normal, &c), Cadence::Interval(10_000));
        assert_eq!(SamplingBand::Imminent.cadence(PowerMode::Normal, &c), Cadence::Continuous);
    }

    #[test]
    fn test_low_power_doubles_intervals() {
        let c = SamplerConfig::default();
        assert_eq!(SamplingBand::Distant.cadence(PowerMode::LowPower, &c), Cadence::Interval(120_000));
        assert_eq!(SamplingBand::Approaching.cadence(PowerMode::LowPower, &c), Cadence::Interval(60_000));
        assert_eq!(SamplingBand::Near.cadence(PowerMode::LowPower, &c), Cadence::Interval(20_000));
        assert_eq!(SamplingBand::Imminent.cadence(PowerMode::LowPower, &c), Cadence::Interval(10_000));
    }

    #[test]
    fn test_cadence_only_emitted_on_band_change() {
        let mut sampler = AdaptiveSampler::default();
        sampler.start(0);

        assert_eq!(
            sampler.on_fix(1_000, 7000.0),
            Some(SamplerAction::SetCadence(Cadence::Interval(60_000)))
        );
        assert_eq!(sampler.on_fix(2_000, 6000.0), None);
        assert_eq!(
            sampler.on_fix(3_000, 400.0),
            Some(SamplerAction::SetCadence(Cadence::Continuous))
        );
    }

    #[test]
    fn test_watchdog_fires_after_15s_then_every_10s() {
        let mut sampler = AdaptiveSampler::default();
        sampler.start(0);
        sampler.on_fix(0, 3000.0);

        assert_eq!(sampler.on_tick(10_000), None);
        assert_eq!(sampler.on_tick(14_999), None);
        assert_eq!(sampler.on_tick(15_000), Some(SamplerAction::OneShotPoll(PollReason::Stale)));
        assert_eq!(sampler.on_tick(20_000), None);
        assert_eq!(sampler.on_tick(25_000), Some(SamplerAction::OneShotPoll(PollReason::Stale)));
        assert_eq!(sampler.on_tick(35_000), Some(SamplerAction::OneShotPoll(PollReason::Stale)));
        assert_eq!(sampler.fallback_polls(), 3);

        // A fix ends the stale period.
        sampler.on_fix(36_000, 3000.0);
        assert!(!sampler.is_stale(40_000));
        assert_eq!(sampler.on_tick(45_000), None);
    }

    #[test]
    fn test_watchdog_counts_from_start_without_fix() {
        let mut sampler = AdaptiveSampler::default();
        sampler.start(100_000);
        assert_eq!(sampler.on_tick(110_000), None);
        assert!(sampler.on_tick(115_000).is_some());
    }

    #[test]
    fn test_watchdog_idle_when_stopped() {
        let mut sampler = AdaptiveSampler::default();
        assert_eq!(sampler.on_tick(1_000_000), None);
        sampler.start(0);
        sampler.stop();
        assert_eq!(sampler.on_tick(1_000_000), None);
    }

    #[test]
    fn test_foreground_resync() {
        let mut sampler = AdaptiveSampler::default();
        sampler.start(0);
        sampler.on_fix(0, 800.0);

        assert!(sampler.on_visibility(false, 1_000).is_empty());
        let actions = sampler.on_visibility(true, 60_000);
        assert_eq!(actions[0], SamplerAction::RestartWatch);
        assert_eq!(actions[1], SamplerAction::OneShotPoll(PollReason::Foreground));
        assert_eq!(actions[2], SamplerAction::SetCadence(Cadence::Interval(10_000)));

        // The foreground poll counts as the most recent fallback.
        assert_eq!(sampler.on_tick(65_000), None);
        assert!(sampler.on_tick(70_000).is_some());
    }

    #[test]
    fn test_visible_while_foreground_is_quiet() {
        let mut sampler = AdaptiveSampler::default();
        sampler.start(0);
        sampler.on_fix(0, 800.0);

        assert!(sampler.on_visibility(true, 1_000).is_empty());
        sampler.on_visibility(false, 2_000);
        assert_eq!(sampler.on_visibility(true, 3_000).len(), 3);
        assert!(sampler.on_visibility(true, 4_000).is_empty());
        assert_eq!(sampler.restarts(), 1);
    }

    #[test]
    fn test_low_battery_forces_low_power() {
        let mut sampler = AdaptiveSampler::default();
        sampler.start(0);
        sampler.on_fix(0, 2000.0);

        assert_eq!(sampler.update_battery(0.5, false), None);
        assert_eq!(sampler.update_battery(0.15, true), None);
        assert_eq!(
            sampler.update_battery(0.15, false),
            Some(SamplerAction::SetCadence(Cadence::Interval(60_000)))
        );
        assert_eq!(sampler.power_mode(), PowerMode::LowPower);
    }

    #[test]
    fn test_battery_estimate() {
        let mut sampler = AdaptiveSampler::default();
        let est = sampler.estimate_battery_usage(60.0, 60.0).unwrap();
        assert_eq!(est.percent, 7);
        assert!(est.enough_battery);

        sampler.update_battery(0.1, true);
        let est = sampler.estimate_battery_usage(60.0, 60.0).unwrap();
        assert!(!est.enough_battery);

        sampler.set_power_mode(PowerMode::LowPower);
        assert_eq!(sampler.estimate_battery_usage(60.0, 60.0).unwrap().percent, 3);
        assert!(sampler.estimate_battery_usage(10.0, 0.0).is_none());
    }
}
