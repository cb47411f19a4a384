//! The alarm state machine.
//!
//! `AlarmEngine` is a reducer: every input (fix, position error, heartbeat,
//! visibility change, motion sample, user command, timer tick) is one call
//! that mutates state and drives the collaborators synchronously. It never
//! blocks and never spawns. Callers serialize events onto it, normally via
//! the channel in [`crate::runtime`].
//!
//! ```text
//!   Idle --arm--> Armed --fix in radius / smart wake--> Triggered
//!                                    Triggered --snooze--> Snoozed --timer--> Triggered
//!                         Triggered | Snoozed --dismiss(proof)--> Dismissed
//!   any non-Idle --disarm--> Idle           Dismissed --arm--> (Idle) --> Armed
//! ```

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::arrival::{self, SpeedTracker};
use crate::challenge::{Challenge, DismissProof, ShakeDetector};
use crate::config::{EngineConfig, NOTIFICATION_BODY, NOTIFICATION_TITLE};
use crate::effector::{Effector, EventSink, KeepAlive, MotionSource, PositionSource, Subscription};
use crate::error::{EngineError, PositionError, Result};
use crate::geo::{self, CompassDirection};
use crate::sampler::{AdaptiveSampler, Cadence, PowerMode, SamplerAction, SamplingBand};
use crate::timer::{FiredTimer, TimerKind, TimerQueue};
use crate::trajectory::TrajectoryPredictor;
use crate::types::{
    AlarmConfig, AlarmState, DismissDifficulty, Destination, MotionSample, PositionFix, PredictedPosition,
    TriggerReason,
};

/// The platform collaborators an engine drives.
pub struct Collaborators {
    pub source: Box<dyn PositionSource>,
    pub effector: Box<dyn Effector>,
    pub keep_alive: Box<dyn KeepAlive>,
    pub motion: Option<Box<dyn MotionSource>>,
}

impl Collaborators {
    pub fn new(
        source: impl PositionSource + 'static,
        effector: impl Effector + 'static,
        keep_alive: impl KeepAlive + 'static,
    ) -> Self {
        Self {
            source: Box::new(source),
            effector: Box::new(effector),
            keep_alive: Box::new(keep_alive),
            motion: None,
        }
    }

    pub fn with_motion(mut self, motion: impl MotionSource + 'static) -> Self {
        self.motion = Some(Box::new(motion));
        self
    }
}

/// Point-in-time view of the engine for UIs and hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: AlarmState,
    pub destination_name: Option<String>,
    /// Distance from the best known position to the destination.
    pub distance_m: Option<f64>,
    pub speed_mps: f64,
    pub moving: bool,
    pub eta_seconds: Option<f64>,
    /// Direction of the destination from the best known position.
    pub compass: Option<CompassDirection>,
    /// Distance and direction come from dead reckoning rather than a real fix.
    pub predicted: bool,
    pub confidence: f64,
    pub gps_degraded: bool,
    pub position_error: Option<PositionError>,
    pub trigger_reason: Option<TriggerReason>,
    pub challenge_prompt: Option<String>,
    pub snooze_ends_at_ms: Option<u64>,
    pub sampling_band: Option<SamplingBand>,
    pub cadence: Option<Cadence>,
    pub power_mode: PowerMode,
    pub shakes: u32,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: AlarmState::Idle,
            destination_name: None,
            distance_m: None,
            speed_mps: 0.0,
            moving: false,
            eta_seconds: None,
            compass: None,
            predicted: false,
            confidence: 1.0,
            gps_degraded: false,
            position_error: None,
            trigger_reason: None,
            challenge_prompt: None,
            snooze_ends_at_ms: None,
            sampling_band: None,
            cadence: None,
            power_mode: PowerMode::Normal,
            shakes: 0,
        }
    }
}

/// Geofence and smart-wake alarm engine.
pub struct AlarmEngine {
    config: EngineConfig,
    alarm: AlarmConfig,
    state: AlarmState,
    destination: Option<Destination>,
    trigger_reason: Option<TriggerReason>,
    trigger_count: u32,

    tracker: SpeedTracker,
    predictor: TrajectoryPredictor,
    sampler: AdaptiveSampler,
    timers: TimerQueue,
    challenge: Option<Challenge>,
    shakes: ShakeDetector,
    rng: StdRng,

    last_fix: Option<PositionFix>,
    position_error: Option<PositionError>,
    gps_degraded: bool,

    sink: EventSink,
    source: Box<dyn PositionSource>,
    effector: Box<dyn Effector>,
    keep_alive: Box<dyn KeepAlive>,
    motion: Option<Box<dyn MotionSource>>,
    source_sub: Option<Subscription>,
    keep_alive_sub: Option<Subscription>,
    motion_sub: Option<Subscription>,
    acquired: bool,
}

impl AlarmEngine {
    pub fn new(config: EngineConfig, sink: EventSink, collaborators: Collaborators) -> Self {
        Self::with_rng(config, sink, collaborators, StdRng::from_entropy())
    }

    /// Deterministic challenges, for tests and replays.
    pub fn with_seed(config: EngineConfig, sink: EventSink, collaborators: Collaborators, seed: u64) -> Self {
        Self::with_rng(config, sink, collaborators, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: EngineConfig, sink: EventSink, collaborators: Collaborators, rng: StdRng) -> Self {
        Self {
            tracker: SpeedTracker::new(),
            predictor: TrajectoryPredictor::new(config.predictor.clone()),
            sampler: AdaptiveSampler::new(config.sampler.clone()),
            shakes: ShakeDetector::new(config.challenge.clone()),
            config,
            alarm: AlarmConfig::default(),
            state: AlarmState::Idle,
            destination: None,
            trigger_reason: None,
            trigger_count: 0,
            timers: TimerQueue::new(),
            challenge: None,
            rng,
            last_fix: None,
            position_error: None,
            gps_degraded: false,
            sink,
            source: collaborators.source,
            effector: collaborators.effector,
            keep_alive: collaborators.keep_alive,
            motion: collaborators.motion,
            source_sub: None,
            keep_alive_sub: None,
            motion_sub: None,
            acquired: false,
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Arm the alarm for `destination`.
    ///
    /// Validation happens before anything changes: an invalid destination
    /// or config leaves the engine exactly as it was. Arming from Dismissed
    /// goes through Idle first.
    pub fn arm(&mut self, destination: Destination, alarm: AlarmConfig, now_ms: u64) -> Result<()> {
        if matches!(self.state, AlarmState::Armed | AlarmState::Triggered | AlarmState::Snoozed) {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                action: "arm",
            });
        }
        destination.validate()?;
        alarm.validate()?;

        if self.state == AlarmState::Dismissed {
            self.reset_to_idle();
        }

        match self.effector.acquire() {
            Ok(()) => self.acquired = true,
            Err(e) => warn!(error = %e, "effector acquire failed, alarm output may be degraded"),
        }

        info!(
            lat = destination.lat,
            lon = destination.lon,
            radius_m = destination.radius_m,
            name = destination.name.as_deref().unwrap_or(""),
            "alarm armed"
        );
        self.destination = Some(destination);
        self.alarm = alarm;
        self.state = AlarmState::Armed;
        self.start_collaborators(now_ms);
        Ok(())
    }

    /// Return to Idle from any state. Cancels every timer before returning;
    /// a no-op when already Idle.
    pub fn disarm(&mut self) {
        if self.state == AlarmState::Idle {
            return;
        }
        info!(from = ?self.state, "alarm disarmed");
        self.reset_to_idle();
    }

    /// Silence a triggered alarm for `minutes` (config default when None).
    pub fn snooze(&mut self, minutes: Option<f64>, now_ms: u64) -> Result<()> {
        if self.state != AlarmState::Triggered {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                action: "snooze",
            });
        }
        let minutes = minutes.unwrap_or(self.config.default_snooze_minutes);
        if !(minutes.is_finite() && minutes > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "snooze minutes must be > 0, got {}",
                minutes
            )));
        }

        self.stop_outputs();
        let deadline = now_ms.saturating_add((minutes * 60_000.0).round() as u64);
        self.timers.schedule(TimerKind::Snooze, deadline);
        self.state = AlarmState::Snoozed;
        info!(minutes, deadline_ms = deadline, "alarm snoozed");
        Ok(())
    }

    /// Dismiss a ringing or snoozed alarm against the challenge issued at
    /// the last trigger. A rejected proof changes nothing.
    pub fn dismiss(&mut self, proof: &DismissProof) -> Result<()> {
        if !matches!(self.state, AlarmState::Triggered | AlarmState::Snoozed) {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                action: "dismiss",
            });
        }
        let accepted = self
            .challenge
            .as_ref()
            .map_or(true, |c| c.verify(proof, self.shakes.count()));
        if !accepted {
            debug!("dismiss proof rejected");
            return Err(EngineError::ChallengeFailed);
        }

        self.timers.cancel_all();
        self.stop_outputs();
        self.stop_collaborators();
        self.release();
        self.challenge = None;
        self.destination = None;
        self.state = AlarmState::Dismissed;
        info!("alarm dismissed");
        Ok(())
    }

    /// Replace the alarm settings. Only allowed while Idle.
    pub fn update_config(&mut self, alarm: AlarmConfig) -> Result<()> {
        if self.state != AlarmState::Idle {
            return Err(EngineError::ConfigLocked(self.state));
        }
        alarm.validate()?;
        self.alarm = alarm;
        Ok(())
    }

    pub fn set_power_mode(&mut self, mode: PowerMode) {
        if let Some(action) = self.sampler.set_power_mode(mode) {
            self.apply(action);
        }
    }

    /// Battery telemetry from the host; low battery switches to low power.
    pub fn update_battery(&mut self, level: f32, charging: bool) {
        if let Some(action) = self.sampler.update_battery(level, charging) {
            self.apply(action);
        }
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// Feed a real position fix. Returns the trigger reason if this fix
    /// moved the alarm from Armed to Triggered.
    pub fn on_fix(&mut self, fix: PositionFix) -> Option<TriggerReason> {
        if !self.state.is_active() {
            debug!(state = ?self.state, "fix ignored");
            return None;
        }
        if !fix.is_valid() {
            warn!(lat = fix.lat, lon = fix.lon, "invalid fix dropped");
            return None;
        }

        self.tracker.update(fix.lat, fix.lon, fix.timestamp_ms);
        let speed = fix.speed_mps.unwrap_or_else(|| self.tracker.current_speed());
        let heading = fix.heading_deg.or_else(|| self.tracker.last_bearing());
        // An out-of-order fix must not rewind the dead-reckoning anchor.
        if self.predictor.last_update_ms().is_some_and(|last| fix.timestamp_ms < last) {
            debug!(timestamp_ms = fix.timestamp_ms, "late fix, predictor anchor kept");
        } else {
            self.predictor
                .update(fix.lat, fix.lon, Some(speed), heading, fix.timestamp_ms);
            self.last_fix = Some(fix);
        }

        if self.position_error.take().is_some() || self.gps_degraded {
            info!("position stream restored");
        }
        self.gps_degraded = false;

        let distance = self.distance_to_destination(fix.lat, fix.lon)?;
        if let Some(action) = self.sampler.on_fix(fix.timestamp_ms, distance) {
            self.apply(action);
        }

        if self.state != AlarmState::Armed {
            return None;
        }
        self.evaluate(fix.lat, fix.lon, speed, fix.timestamp_ms)
    }

    /// Check a position against the geofence and smart-wake conditions.
    ///
    /// Only evaluated while Armed; once triggered, further positions never
    /// re-trigger.
    pub fn check_position(&mut self, lat: f64, lon: f64, speed_mps: f64, now_ms: u64) -> Option<TriggerReason> {
        if self.state != AlarmState::Armed {
            return None;
        }
        self.evaluate(lat, lon, speed_mps, now_ms)
    }

    /// The position source failed. Recorded as a standing condition; the
    /// state does not change.
    pub fn on_position_error(&mut self, error: PositionError, now_ms: u64) {
        if !self.state.is_active() {
            return;
        }
        if self.position_error != Some(error) {
            warn!(error = %error, "position source error");
        }
        self.position_error = Some(error);
        self.predictor.mark_gps_lost(now_ms);
    }

    /// Keep-alive heartbeat: runs the staleness watchdog and, while fixes
    /// are missing, evaluates the dead-reckoned position.
    pub fn on_heartbeat(&mut self, now_ms: u64) -> Option<TriggerReason> {
        if !self.state.is_active() {
            return None;
        }
        if let Some(action) = self.sampler.on_tick(now_ms) {
            self.apply(action);
        }
        if self.sampler.is_stale(now_ms) && !self.predictor.is_gps_lost() {
            self.predictor.mark_gps_lost(now_ms);
        }
        if self.predictor.should_alert_user(now_ms) && !self.gps_degraded {
            warn!(
                lost_s = self.predictor.time_since_gps_lost(now_ms),
                "GPS degraded, alarm running on extrapolated positions"
            );
            self.gps_degraded = true;
        }

        if self.state != AlarmState::Armed || !self.predictor.is_gps_lost() {
            return None;
        }
        let predicted = self.usable_prediction(now_ms)?;
        debug!(
            lat = predicted.lat,
            lon = predicted.lon,
            confidence = predicted.confidence,
            "evaluating predicted position"
        );
        self.evaluate(predicted.lat, predicted.lon, predicted.speed_mps, now_ms)
    }

    pub fn on_visibility(&mut self, visible: bool, now_ms: u64) {
        for action in self.sampler.on_visibility(visible, now_ms) {
            self.apply(action);
        }
    }

    /// Accelerometer sample for the shake challenge. Returns true once the
    /// required number of shakes has been reached.
    pub fn on_motion(&mut self, sample: MotionSample) -> bool {
        if self.state != AlarmState::Triggered || !matches!(self.challenge, Some(Challenge::Shake { .. })) {
            return false;
        }
        if self.shakes.process_sample(&sample) {
            debug!(count = self.shakes.count(), "shake registered");
        }
        self.shakes.is_complete()
    }

    /// Fire at most one due timer.
    pub fn advance(&mut self, now_ms: u64) -> Option<FiredTimer> {
        let fired = self.timers.pop_due(now_ms)?;
        match fired.kind {
            TimerKind::Snooze => {
                if self.state == AlarmState::Snoozed {
                    info!("snooze elapsed");
                    self.trigger(TriggerReason::SnoozeExpired, now_ms);
                }
            }
            TimerKind::VibrationPulse => {
                if self.state == AlarmState::Triggered && self.alarm.vibration_enabled {
                    self.pulse_vibration(now_ms);
                }
            }
        }
        Some(fired)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn alarm_config(&self) -> &AlarmConfig {
        &self.alarm
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    pub fn trigger_reason(&self) -> Option<TriggerReason> {
        self.trigger_reason
    }

    /// Number of times the alarm entered Triggered since construction.
    pub fn trigger_count(&self) -> u32 {
        self.trigger_count
    }

    pub fn position_error(&self) -> Option<PositionError> {
        self.position_error
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn next_timer_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn tracker(&self) -> &SpeedTracker {
        &self.tracker
    }

    pub fn predictor(&self) -> &TrajectoryPredictor {
        &self.predictor
    }

    pub fn sampler(&self) -> &AdaptiveSampler {
        &self.sampler
    }

    pub fn status(&self, now_ms: u64) -> EngineStatus {
        let prediction = if self.predictor.is_gps_lost() {
            self.usable_prediction(now_ms)
        } else {
            None
        };
        let position = prediction
            .map(|p| (p.lat, p.lon))
            .or_else(|| self.last_fix.map(|f| (f.lat, f.lon)));
        let speed = self
            .last_fix
            .and_then(|f| f.speed_mps)
            .unwrap_or_else(|| self.tracker.current_speed());

        let (distance_m, eta_seconds, compass) = match (position, &self.destination) {
            (Some((lat, lon)), Some(dest)) => (
                Some(geo::distance(lat, lon, dest.lat, dest.lon)),
                arrival::calculate_eta(lat, lon, dest.lat, dest.lon, speed).map(|e| e.seconds),
                Some(geo::compass_sector(geo::bearing(lat, lon, dest.lat, dest.lon))),
            ),
            _ => (None, None, None),
        };

        EngineStatus {
            state: self.state,
            destination_name: self.destination.as_ref().and_then(|d| d.name.clone()),
            distance_m,
            speed_mps: speed,
            moving: self.tracker.is_moving(),
            eta_seconds,
            compass,
            predicted: prediction.is_some(),
            confidence: prediction.map_or(self.predictor.confidence(now_ms), |p| p.confidence),
            gps_degraded: self.predictor.should_alert_user(now_ms),
            position_error: self.position_error,
            trigger_reason: self.trigger_reason,
            challenge_prompt: self.challenge.as_ref().map(Challenge::prompt),
            snooze_ends_at_ms: self.timers.deadline_of(TimerKind::Snooze),
            sampling_band: self.sampler.band(),
            cadence: self.sampler.cadence(),
            power_mode: self.sampler.power_mode(),
            shakes: self.shakes.count(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn distance_to_destination(&self, lat: f64, lon: f64) -> Option<f64> {
        self.destination
            .as_ref()
            .map(|d| geo::distance(lat, lon, d.lat, d.lon))
    }

    /// Extrapolated position to evaluate while fixes are missing. Low
    /// confidence still counts: firing early beats never firing. Past the
    /// horizon the predictor holds the last fix, which is safe to check.
    fn usable_prediction(&self, now_ms: u64) -> Option<PredictedPosition> {
        self.predictor.predicted_position(now_ms).filter(|p| p.is_predicted)
    }

    fn evaluate(&mut self, lat: f64, lon: f64, speed_mps: f64, now_ms: u64) -> Option<TriggerReason> {
        let dest = self.destination.as_ref()?;
        let distance = geo::distance(lat, lon, dest.lat, dest.lon);

        let reason = if distance <= dest.radius_m {
            TriggerReason::Geofence
        } else if arrival::should_trigger_smart_wake(
            lat,
            lon,
            dest.lat,
            dest.lon,
            speed_mps,
            self.alarm.wake_minutes_before,
        ) {
            TriggerReason::SmartWake
        } else {
            return None;
        };

        info!(distance_m = distance, speed_mps, reason = ?reason, "destination reached");
        self.trigger(reason, now_ms);
        Some(reason)
    }

    fn trigger(&mut self, reason: TriggerReason, now_ms: u64) {
        self.state = AlarmState::Triggered;
        self.trigger_reason = Some(reason);
        self.trigger_count += 1;

        let difficulty = self.alarm.dismiss_difficulty;
        self.challenge = Some(Challenge::issue(difficulty, &self.config.challenge, &mut self.rng));
        self.shakes.reset();
        if difficulty == DismissDifficulty::Shake {
            self.start_motion();
        }

        if self.alarm.sound_enabled {
            let volume = self.alarm.effective_initial_volume();
            if let Err(e) = self.effector.start_sound(self.alarm.sound_profile, volume) {
                warn!(error = %e, "failed to start alarm sound");
            } else if self.alarm.escalation_seconds > 0 {
                if let Err(e) = self.effector.escalate(self.alarm.escalation_seconds) {
                    warn!(error = %e, "failed to start volume escalation");
                }
            }
        }
        if self.alarm.vibration_enabled {
            self.pulse_vibration(now_ms);
        }
        if let Err(e) = self.effector.show_notification(NOTIFICATION_TITLE, NOTIFICATION_BODY) {
            warn!(error = %e, "notification failed");
        }

        info!(reason = ?reason, count = self.trigger_count, "alarm triggered");
    }

    /// Play the vibration pattern once and schedule the next cycle.
    fn pulse_vibration(&mut self, at_ms: u64) {
        let profile = self.alarm.effective_vibration();
        if let Err(e) = self.effector.vibrate(profile.pattern_ms()) {
            warn!(error = %e, "vibration failed");
        }
        self.timers
            .schedule(TimerKind::VibrationPulse, at_ms.saturating_add(profile.cycle_ms().max(1)));
    }

    fn stop_outputs(&mut self) {
        self.timers.cancel_kind(TimerKind::VibrationPulse);
        self.effector.stop_sound();
        self.effector.stop_vibration();
        self.stop_motion();
    }

    fn start_collaborators(&mut self, now_ms: u64) {
        self.sampler.start(now_ms);
        self.start_source();
        match self.keep_alive.start(self.sink.clone()) {
            Ok(sub) => self.keep_alive_sub = Some(sub),
            Err(e) => warn!(error = %e, "keep-alive unavailable, timers may be throttled"),
        }
    }

    fn start_source(&mut self) {
        match self.source.start(self.sink.clone()) {
            Ok(sub) => self.source_sub = Some(sub),
            Err(e) => {
                warn!(error = %e, "position source failed to start");
                self.position_error = Some(e);
            }
        }
    }

    fn stop_source(&mut self) {
        if let Some(sub) = self.source_sub.take() {
            sub.cancel();
        }
        self.source.stop();
    }

    fn stop_collaborators(&mut self) {
        self.stop_source();
        if let Some(sub) = self.keep_alive_sub.take() {
            sub.cancel();
        }
        self.keep_alive.stop();
        self.sampler.stop();
    }

    fn start_motion(&mut self) {
        if self.motion_sub.is_some() {
            return;
        }
        if let Some(motion) = self.motion.as_mut() {
            match motion.start(self.sink.clone()) {
                Ok(sub) => self.motion_sub = Some(sub),
                Err(e) => warn!(error = %e, "motion source unavailable for shake challenge"),
            }
        }
    }

    fn stop_motion(&mut self) {
        if let Some(sub) = self.motion_sub.take() {
            sub.cancel();
            if let Some(motion) = self.motion.as_mut() {
                motion.stop();
            }
        }
    }

    fn release(&mut self) {
        if self.acquired {
            self.effector.release();
            self.acquired = false;
        }
    }

    fn reset_to_idle(&mut self) {
        self.timers.cancel_all();
        if self.state != AlarmState::Dismissed {
            self.stop_outputs();
            self.stop_collaborators();
        }
        self.release();
        self.destination = None;
        self.trigger_reason = None;
        self.challenge = None;
        self.shakes.reset();
        self.tracker.reset();
        self.predictor.reset();
        self.last_fix = None;
        self.position_error = None;
        self.gps_degraded = false;
        self.state = AlarmState::Idle;
    }

    fn apply(&mut self, action: SamplerAction) {
        match action {
            SamplerAction::SetCadence(cadence) => {
                debug!(?cadence, "position cadence");
                self.source.set_cadence(cadence);
            }
            SamplerAction::OneShotPoll(reason) => {
                debug!(?reason, "one-shot position poll");
                self.source.request_fix();
            }
            SamplerAction::RestartWatch => {
                self.stop_source();
                self.start_source();
            }
        }
    }
}

impl Drop for AlarmEngine {
    fn drop(&mut self) {
        if self.state != AlarmState::Idle {
            self.reset_to_idle();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
