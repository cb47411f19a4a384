//! Async driver around [`AlarmEngine`].
//!
//! All inputs funnel through one unbounded channel and are applied to the
//! engine strictly one at a time. Sensor callbacks on foreign threads only
//! ever touch the [`EventSink`]; user commands carry a oneshot reply; the
//! latest [`EngineStatus`] is published on a watch channel after every turn.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::alarm::{AlarmEngine, Collaborators, EngineStatus};
use crate::challenge::DismissProof;
use crate::config::EngineConfig;
use crate::effector::EventSink;
use crate::error::{EngineError, PositionError, Result};
use crate::types::{AlarmConfig, Destination, MotionSample, PositionFix};

/// Timer resolution of the driver loop.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Everything that can happen to the engine.
#[derive(Debug)]
pub enum EngineEvent {
    Fix(PositionFix),
    PositionFailed(PositionError),
    Motion(MotionSample),
    Heartbeat,
    Visibility(bool),
    Battery { level: f32, charging: bool },
    Command(EngineCommand),
}

/// User-initiated requests, each answered on its own oneshot.
#[derive(Debug)]
pub enum EngineCommand {
    Arm {
        destination: Destination,
        alarm: AlarmConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    Disarm {
        reply: oneshot::Sender<()>,
    },
    Snooze {
        minutes: Option<f64>,
        reply: oneshot::Sender<Result<()>>,
    },
    Dismiss {
        proof: DismissProof,
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateConfig {
        alarm: AlarmConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Milliseconds since the driver was created. Position sources should
/// stamp fixes with this clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the engine and its event receiver.
pub struct EngineDriver {
    engine: AlarmEngine,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    status_tx: watch::Sender<EngineStatus>,
    clock: MonotonicClock,
    tick: Duration,
}

impl EngineDriver {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> (Self, EngineHandle) {
        let (sink, events) = EventSink::channel();
        let engine = AlarmEngine::new(config, sink.clone(), collaborators);
        Self::from_engine(engine, sink, events)
    }

    /// Wrap an engine that was built on `sink`/`events`.
    pub fn from_engine(
        engine: AlarmEngine,
        sink: EventSink,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> (Self, EngineHandle) {
        let clock = MonotonicClock::new();
        let (status_tx, status_rx) = watch::channel(engine.status(0));
        let driver = Self {
            engine,
            events,
            status_tx,
            clock,
            tick: TICK_INTERVAL,
        };
        let handle = EngineHandle {
            sink,
            status: status_rx,
            clock,
        };
        (driver, handle)
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Process events until shutdown. The engine is disarmed on exit.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("engine driver started");

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    if let EngineEvent::Command(EngineCommand::Shutdown { reply }) = event {
                        self.engine.disarm();
                        self.publish();
                        let _ = reply.send(());
                        break;
                    }
                    self.handle(event);
                }
                _ = ticker.tick() => {
                    let now = self.clock.now_ms();
                    while let Some(fired) = self.engine.advance(now) {
                        debug!(kind = ?fired.kind, "timer fired");
                        self.publish();
                    }
                }
            }
        }

        self.engine.disarm();
        info!("engine driver stopped");
    }

    fn handle(&mut self, event: EngineEvent) {
        let now = self.clock.now_ms();
        match event {
            EngineEvent::Fix(fix) => {
                self.engine.on_fix(fix);
            }
            EngineEvent::PositionFailed(error) => self.engine.on_position_error(error, now),
            EngineEvent::Motion(sample) => {
                self.engine.on_motion(sample);
            }
            EngineEvent::Heartbeat => {
                self.engine.on_heartbeat(now);
            }
            EngineEvent::Visibility(visible) => self.engine.on_visibility(visible, now),
            EngineEvent::Battery { level, charging } => self.engine.update_battery(level, charging),
            EngineEvent::Command(command) => {
                self.handle_command(command, now);
                return;
            }
        }
        self.publish();
    }

    /// Replies go out after the status is published so a caller awaiting
    /// the reply always observes the new state.
    fn handle_command(&mut self, command: EngineCommand, now: u64) {
        match command {
            EngineCommand::Arm {
                destination,
                alarm,
                reply,
            } => {
                let result = self.engine.arm(destination, alarm, now);
                self.publish();
                let _ = reply.send(result);
            }
            EngineCommand::Disarm { reply } => {
                self.engine.disarm();
                self.publish();
                let _ = reply.send(());
            }
            EngineCommand::Snooze { minutes, reply } => {
                let result = self.engine.snooze(minutes, now);
                self.publish();
                let _ = reply.send(result);
            }
            EngineCommand::Dismiss { proof, reply } => {
                let result = self.engine.dismiss(&proof);
                self.publish();
                let _ = reply.send(result);
            }
            EngineCommand::UpdateConfig { alarm, reply } => {
                let _ = reply.send(self.engine.update_config(alarm));
            }
            EngineCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.engine.status(self.clock.now_ms()));
    }
}

/// Cloneable front-end to a running driver.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    sink: EventSink,
    status: watch::Receiver<EngineStatus>,
    clock: MonotonicClock,
}

impl EngineHandle {
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub fn push_fix(&self, fix: PositionFix) -> bool {
        self.sink.fix(fix)
    }

    pub async fn arm(&self, destination: Destination, alarm: AlarmConfig) -> Result<()> {
        self.request(|reply| EngineCommand::Arm {
            destination,
            alarm,
            reply,
        })
        .await?
    }

    pub async fn disarm(&self) -> Result<()> {
        self.request(|reply| EngineCommand::Disarm { reply }).await
    }

    pub async fn snooze(&self, minutes: Option<f64>) -> Result<()> {
        self.request(|reply| EngineCommand::Snooze { minutes, reply }).await?
    }

    pub async fn dismiss(&self, proof: DismissProof) -> Result<()> {
        self.request(|reply| EngineCommand::Dismiss { proof, reply }).await?
    }

    pub async fn update_config(&self, alarm: AlarmConfig) -> Result<()> {
        self.request(|reply| EngineCommand::UpdateConfig { alarm, reply }).await?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sink.send(EngineEvent::Command(build(tx)))?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effector::testing::{CountingKeepAlive, RecordingEffector, ScriptedPositionSource};
    use crate::geo;
    use crate::types::{AlarmState, TriggerReason};

    fn driver() -> (EngineDriver, EngineHandle, RecordingEffector, ScriptedPositionSource) {
        let fx = RecordingEffector::default();
        let source = ScriptedPositionSource::default();
        let (driver, handle) = EngineDriver::new(
            EngineConfig::default(),
            Collaborators::new(source.clone(), fx.clone(), CountingKeepAlive::default()),
        );
        (driver.with_tick(Duration::from_millis(10)), handle, fx, source)
    }

    #[tokio::test]
    async fn test_arm_trigger_dismiss_through_channel() {
        let (driver, handle, fx, source) = driver();
        let task = tokio::spawn(driver.run());

        handle
            .arm(Destination::new(0.0, 0.0, 500.0), AlarmConfig::default())
            .await
            .unwrap();
        assert_eq!(handle.status().state, AlarmState::Armed);
        assert_eq!(source.starts(), 1);

        let mut status = handle.subscribe();
        let (lat, lon) = geo::destination_point(0.0, 0.0, 0.0, 100.0);
        assert!(handle.push_fix(PositionFix::new(lat, lon, handle.clock().now_ms())));

        let triggered = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.state == AlarmState::Triggered),
        )
        .await
        .expect("trigger not observed")
        .unwrap()
        .clone();
        assert_eq!(triggered.trigger_reason, Some(TriggerReason::Geofence));
        assert!(fx.is_sounding());

        handle.dismiss(DismissProof::Acknowledge).await.unwrap();
        assert_eq!(handle.status().state, AlarmState::Dismissed);
        assert!(!fx.is_sounding());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_command_errors_are_returned() {
        let (driver, handle, _fx, _source) = driver();
        let task = tokio::spawn(driver.run());

        assert!(matches!(
            handle.snooze(None).await,
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            handle
                .arm(Destination::new(0.0, 0.0, -5.0), AlarmConfig::default())
                .await,
            Err(EngineError::InvalidDestination(_))
        ));

        handle
            .arm(Destination::new(0.0, 0.0, 500.0), AlarmConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            handle.update_config(AlarmConfig::default()).await,
            Err(EngineError::ConfigLocked(AlarmState::Armed))
        ));
        handle.disarm().await.unwrap();
        assert_eq!(handle.status().state, AlarmState::Idle);
        handle.update_config(AlarmConfig::default()).await.unwrap();

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_disarms_and_closes() {
        let (driver, handle, _fx, source) = driver();
        let task = tokio::spawn(driver.run());

        handle
            .arm(Destination::new(0.0, 0.0, 500.0), AlarmConfig::default())
            .await
            .unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(handle.status().state, AlarmState::Idle);
        assert_eq!(source.stops(), 1);
        assert!(matches!(handle.disarm().await, Err(EngineError::ChannelClosed)));
    }
}
