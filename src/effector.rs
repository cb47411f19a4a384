//! Collaborator contracts: where positions come from and where alarms go.
//!
//! The engine never talks to platform APIs directly. Position sources,
//! motion sensors and the keep-alive heartbeat push into an [`EventSink`]
//! (from whatever thread their callbacks run on) and hand back a
//! [`Subscription`] the engine cancels when it no longer wants events.
//! Output goes through an injected [`Effector`] with an explicit
//! acquire/release lifecycle instead of ambient audio/vibration globals.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EffectorError, EngineError, PositionError, Result};
use crate::runtime::EngineEvent;
use crate::sampler::Cadence;
use crate::types::{MotionSample, PositionFix, SoundProfile};

/// Cancellation handle returned by every collaborator subscription.
///
/// Cancelling (or dropping) it tells the producer to stop delivering.
/// Producers keep a clone of [`Subscription::token`] and stop on `cancelled()`.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token for the producing side.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Thread-safe entry point into the engine's single event queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    /// A fresh queue. The receiver belongs to whoever drives the engine.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: EngineEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| EngineError::ChannelClosed)
    }

    /// Deliver a position fix. Returns false once the engine is gone.
    pub fn fix(&self, fix: PositionFix) -> bool {
        self.send(EngineEvent::Fix(fix)).is_ok()
    }

    pub fn position_error(&self, error: PositionError) -> bool {
        self.send(EngineEvent::PositionFailed(error)).is_ok()
    }

    pub fn motion(&self, sample: MotionSample) -> bool {
        self.send(EngineEvent::Motion(sample)).is_ok()
    }

    pub fn heartbeat(&self) -> bool {
        self.send(EngineEvent::Heartbeat).is_ok()
    }

    pub fn visibility(&self, visible: bool) -> bool {
        self.send(EngineEvent::Visibility(visible)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Platform position provider (GPS / fused location).
pub trait PositionSource: Send {
    /// Begin the push stream. Fixes and errors go to `sink`.
    fn start(&mut self, sink: EventSink) -> std::result::Result<Subscription, PositionError>;

    /// Tear the stream down.
    fn stop(&mut self);

    /// One-shot request outside the push stream. The result arrives through the sink.
    fn request_fix(&mut self) {}

    /// Delivery cadence hint.
    fn set_cadence(&mut self, _cadence: Cadence) {}
}

/// Accelerometer feed, only needed for the shake challenge.
pub trait MotionSource: Send {
    fn start(&mut self, sink: EventSink) -> std::result::Result<Subscription, EffectorError>;
    fn stop(&mut self);
}

/// Keeps the host from suspending timers while an alarm is live, and ticks
/// a heartbeat into the sink roughly every 10 s.
pub trait KeepAlive: Send {
    fn start(&mut self, sink: EventSink) -> std::result::Result<Subscription, EffectorError>;
    fn stop(&mut self);
}

/// Sound, vibration and notification output.
pub trait Effector: Send {
    /// Grab host resources (wake lock, audio session) when an alarm is armed.
    fn acquire(&mut self) -> std::result::Result<(), EffectorError> {
        Ok(())
    }

    /// Give them back when the alarm goes Idle or Dismissed.
    fn release(&mut self) {}

    fn start_sound(&mut self, profile: SoundProfile, initial_volume: f32) -> std::result::Result<(), EffectorError>;

    fn stop_sound(&mut self);

    /// Ramp the playing sound up to the profile maximum over `duration_s`.
    fn escalate(&mut self, duration_s: u32) -> std::result::Result<(), EffectorError>;

    fn vibrate(&mut self, pattern_ms: &[u32]) -> std::result::Result<(), EffectorError>;

    fn stop_vibration(&mut self);

    fn show_notification(&mut self, title: &str, body: &str) -> std::result::Result<(), EffectorError>;
}

/// Volume reached `elapsed_s` seconds into an escalation ramp: linear
/// one-second steps from `initial` to `max` over `duration_s`.
pub fn escalation_volume(initial: f32, max: f32, duration_s: u32, elapsed_s: u32) -> f32 {
    if duration_s == 0 || initial >= max {
        return max;
    }
    let step = (max - initial) / duration_s as f32;
    (initial + step * elapsed_s.min(duration_s) as f32).min(max)
}

/// Effector that only logs. Useful for headless hosts and simulation.
#[derive(Debug, Default)]
pub struct LogEffector {
    sounding: Option<SoundProfile>,
    vibrating: bool,
}

impl LogEffector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding.is_some()
    }

    pub fn is_vibrating(&self) -> bool {
        self.vibrating
    }
}

impl Effector for LogEffector {
    fn acquire(&mut self) -> std::result::Result<(), EffectorError> {
        debug!("effector acquired");
        Ok(())
    }

    fn release(&mut self) {
        debug!("effector released");
    }

    fn start_sound(&mut self, profile: SoundProfile, initial_volume: f32) -> std::result::Result<(), EffectorError> {
        info!(?profile, initial_volume, "alarm sound started");
        self.sounding = Some(profile);
        Ok(())
    }

    fn stop_sound(&mut self) {
        if self.sounding.take().is_some() {
            info!("alarm sound stopped");
        }
    }

    fn escalate(&mut self, duration_s: u32) -> std::result::Result<(), EffectorError> {
        match self.sounding {
            Some(profile) => {
                info!(duration_s, max_volume = profile.max_volume(), "volume escalation started");
                Ok(())
            }
            None => Err(EffectorError::Failed("escalate without a playing sound".into())),
        }
    }

    fn vibrate(&mut self, pattern_ms: &[u32]) -> std::result::Result<(), EffectorError> {
        debug!(?pattern_ms, "vibrate");
        self.vibrating = true;
        Ok(())
    }

    fn stop_vibration(&mut self) {
        self.vibrating = false;
    }

    fn show_notification(&mut self, title: &str, body: &str) -> std::result::Result<(), EffectorError> {
        info!(title, body, "notification");
        Ok(())
    }
}

/// Effector that does nothing at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEffector;

impl Effector for NoopEffector {
    fn start_sound(&mut self, _profile: SoundProfile, _initial_volume: f32) -> std::result::Result<(), EffectorError> {
        Ok(())
    }
    fn stop_sound(&mut self) {}
    fn escalate(&mut self, _duration_s: u32) -> std::result::Result<(), EffectorError> {
        Ok(())
    }
    fn vibrate(&mut self, _pattern_ms: &[u32]) -> std::result::Result<(), EffectorError> {
        Ok(())
    }
    fn stop_vibration(&mut self) {}
    fn show_notification(&mut self, _title: &str, _body: &str) -> std::result::Result<(), EffectorError> {
        Ok(())
    }
}

/// Position source fed by the host itself through the sink (FFI, replay).
///
/// `start` only hands out a subscription; fixes arrive whenever the host
/// pushes them. Poll requests and cadence changes are counted so the host
/// can read them back.
#[derive(Debug, Default)]
pub struct ManualPositionSource {
    active: Option<CancellationToken>,
    pub poll_requests: u64,
    pub cadence: Option<Cadence>,
}

impl ManualPositionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|t| !t.is_cancelled())
    }
}

impl PositionSource for ManualPositionSource {
    fn start(&mut self, _sink: EventSink) -> std::result::Result<Subscription, PositionError> {
        let subscription = Subscription::new();
        self.active = Some(subscription.token());
        Ok(subscription)
    }

    fn stop(&mut self) {
        if let Some(token) = self.active.take() {
            token.cancel();
        }
    }

    fn request_fix(&mut self) {
        self.poll_requests += 1;
    }

    fn set_cadence(&mut self, cadence: Cadence) {
        self.cadence = Some(cadence);
    }
}

/// Keep-alive whose heartbeat the host drives by hand.
#[derive(Debug, Default)]
pub struct ManualKeepAlive {
    active: Option<CancellationToken>,
}

impl ManualKeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|t| !t.is_cancelled())
    }
}

impl KeepAlive for ManualKeepAlive {
    fn start(&mut self, _sink: EventSink) -> std::result::Result<Subscription, EffectorError> {
        let subscription = Subscription::new();
        self.active = Some(subscription.token());
        Ok(subscription)
    }

    fn stop(&mut self) {
        if let Some(token) = self.active.take() {
            token.cancel();
        }
    }
}

/// Keep-alive that ticks the heartbeat from a tokio task.
#[derive(Debug)]
pub struct IntervalKeepAlive {
    period: std::time::Duration,
}

impl IntervalKeepAlive {
    pub fn new(period: std::time::Duration) -> Self {
        Self { period }
    }
}

impl KeepAlive for IntervalKeepAlive {
    fn start(&mut self, sink: EventSink) -> std::result::Result<Subscription, EffectorError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| EffectorError::Unsupported("no tokio runtime for heartbeat".into()))?;
        let subscription = Subscription::new();
        let token = subscription.token();
        let period = self.period;
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !sink.heartbeat() {
                            warn!("heartbeat sink closed");
                            break;
                        }
                    }
                }
            }
        });
        Ok(subscription)
    }

    fn stop(&mut self) {}
}

// ============================================================================
// TEST DOUBLES
// ============================================================================
