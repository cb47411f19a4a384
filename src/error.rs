//! Error types for the alarm engine.
//!
//! Nothing here is fatal to the process. Every variant degrades toward
//! "the alarm may fire late or early", never "the alarm silently never fires".

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AlarmState;

/// Failure reported by the platform position source.
///
/// Surfaced to the caller as a standing condition. It never changes the
/// alarm state by itself.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable")]
    Unavailable,

    #[error("position request timed out")]
    Timeout,
}

/// Failure reported by an output effector (sound, vibration, notification).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectorError {
    #[error("effector unsupported on this host: {0}")]
    Unsupported(String),

    #[error("effector permission denied: {0}")]
    PermissionDenied(String),

    #[error("effector failed: {0}")]
    Failed(String),
}

/// Engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Invalid alarm configuration: {0}")]
    InvalidConfig(String),

    #[error("Alarm configuration is locked while {0:?}")]
    ConfigLocked(AlarmState),

    #[error("Cannot {action} while {from:?}")]
    InvalidTransition {
        from: AlarmState,
        action: &'static str,
    },

    #[error("Dismissal challenge failed")]
    ChallengeFailed,

    #[error("Position source error: {0}")]
    Position(#[from] PositionError),

    #[error("Effector error: {0}")]
    Effector(#[from] EffectorError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine event channel closed")]
    ChannelClosed,
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl EngineError {
    /// Recoverable errors leave the engine in the state it was in; the
    /// caller may simply retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::ChallengeFailed
                | EngineError::InvalidTransition { .. }
                | EngineError::ConfigLocked(_)
                | EngineError::Position(_)
                | EngineError::Effector(_)
        )
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
