use thiserror::Error;

use crate::source::SensorKind;

/// Activation failures reported by [`crate::engine::OrientationEngine::enable`].
///
/// Malformed samples and premature calibration readings never show up here;
/// they are dropped or deferred inside the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FusionError {
    #[error("no orientation sensor is available on this platform")]
    SensorUnavailable,
    #[error("permission to read the {sensor} was refused")]
    PermissionDenied { sensor: SensorKind },
    #[error("sensor failed to start: {0}")]
    SensorStart(String),
}

/// Successful result of enabling the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Started,
    AlreadyEnabled,
}
