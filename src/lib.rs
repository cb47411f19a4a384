//! GeoWake Location Alarm Engine Library
//!
//! Wakes a traveler as they approach a destination. Live position fixes,
//! adaptive sampling and dead reckoning keep the alarm firing correctly
//! through GPS gaps, app backgrounding and battery-saving throttling.
//!
//! # Design Philosophy
//!
//! - **Never silently miss the stop**: every failure degrades toward "may
//!   fire late or early". Position loss is a standing condition, not a
//!   state change, and the engine keeps evaluating extrapolated positions.
//! - **One reducer, one queue**: sensor callbacks from any thread are
//!   marshalled onto a single event channel; the engine itself never locks.
//! - **Timers are data**: snooze and vibration timers live in the engine and
//!   are cancelled atomically with the transition that obsoletes them.
//! - **Injected effectors**: sound, vibration, notification and keep-alive
//!   sit behind traits with an explicit acquire/release lifecycle.
//!
//! # Example
//!
//! ```ignore
//! use geowake::{AlarmConfig, AlarmEngine, Collaborators, Destination, EngineConfig, EventSink, PositionFix};
//! use geowake::effector::{LogEffector, ManualKeepAlive, ManualPositionSource};
//!
//! let (sink, _events) = EventSink::channel();
//! let mut engine = AlarmEngine::new(
//!     EngineConfig::default(),
//!     sink,
//!     Collaborators::new(ManualPositionSource::new(), LogEffector::new(), ManualKeepAlive::new()),
//! );
//! engine.arm(Destination::new(51.5308, -0.1238, 500.0), AlarmConfig::default(), 0)?;
//! engine.on_fix(PositionFix::new(51.5300, -0.1240, 1_000).with_speed(12.0));
//! ```

pub mod alarm;
pub mod arrival;
pub mod challenge;
pub mod config;
pub mod effector;
pub mod error;
pub mod ffi;
pub mod geo;
pub mod runtime;
pub mod sampler;
pub mod timer;
pub mod trajectory;
pub mod types;


// Re-export commonly used types
pub use alarm::{AlarmEngine, Collaborators, EngineStatus};
pub use challenge::{Challenge, DismissProof};
pub use config::EngineConfig;
pub use effector::{Effector, EventSink, KeepAlive, MotionSource, PositionSource, Subscription};
pub use error::{EffectorError, EngineError, PositionError, Result};
pub use runtime::{EngineCommand, EngineDriver, EngineEvent, EngineHandle};
pub use sampler::{Cadence, PowerMode, SamplingBand};
pub use types::{
    AlarmConfig, AlarmState, Destination, DismissDifficulty, MotionSample, PositionFix, PredictedPosition,
    SoundProfile, TriggerReason, VibrationProfile,
};
