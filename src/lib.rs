use serde::{Deserialize, Serialize};

pub mod config;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod math;
pub mod normalizer;
pub mod pose;
pub mod sample;
pub mod screen_rotation;
pub mod source;

pub use config::{load_config, FusionConfig, PlatformCapabilities};
pub use engine::{OrientationEngine, SensorPipeline};
pub use error::{EnableOutcome, FusionError};
pub use fusion::YawPitch;
pub use screen_rotation::{RotationNotifier, ScreenRotation};
pub use source::{ChannelSource, PermissionBroker, PermissionState, SensorFeed, SensorKind, SensorSource};

/// Payload of the engine's change notification.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub is_trusted: bool,
}
