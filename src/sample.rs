use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Angular rate around the device axes, in degrees per second.
///
/// `alpha` turns about z, `beta` about x and `gamma` about y. Stub sensors
/// report `None` for every component.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct RotationRate {
    pub alpha: Option<f32>,
    pub beta: Option<f32>,
    pub gamma: Option<f32>,
}

impl RotationRate {
    pub fn is_available(&self) -> bool {
        self.alpha.is_some()
    }

    /// `(alpha, beta, gamma)`, missing components read as zero.
    pub fn to_vector(&self) -> Vector3<f32> {
        Vector3::new(
            self.alpha.unwrap_or_default(),
            self.beta.unwrap_or_default(),
            self.gamma.unwrap_or_default(),
        )
    }
}

/// Linear acceleration in m/s².
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Acceleration {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
}

impl Acceleration {
    pub fn is_available(&self) -> bool {
        self.x.is_some()
    }

    pub fn to_vector(&self) -> Vector3<f32> {
        Vector3::new(
            self.x.unwrap_or_default(),
            self.y.unwrap_or_default(),
            self.z.unwrap_or_default(),
        )
    }
}

/// A raw motion event as delivered by the platform.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMotionEvent {
    /// Milliseconds between samples.
    pub interval: f32,
    #[serde(default)]
    pub timestamp: f64,
    pub rotation_rate: Option<RotationRate>,
    pub acceleration_including_gravity: Option<Acceleration>,
    pub acceleration: Option<Acceleration>,
}

/// A raw orientation event, Euler angles in degrees.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct DeviceOrientationEvent {
    pub alpha: Option<f32>,
    pub beta: Option<f32>,
    pub gamma: Option<f32>,
}

impl DeviceOrientationEvent {
    pub fn new(alpha: f32, beta: f32, gamma: f32) -> Self {
        Self {
            alpha: Some(alpha),
            beta: Some(beta),
            gamma: Some(gamma),
        }
    }
}

/// Attitude from a platform relative-orientation sensor, Z-up sensor frame.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct QuaternionReading {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl QuaternionReading {
    /// The normalized reading, or `None` when it has no length.
    pub fn to_unit(&self) -> Option<UnitQuaternion<f32>> {
        let quat = Quaternion::new(self.w, self.x, self.y, self.z);
        UnitQuaternion::try_new(quat, f32::EPSILON)
    }
}

impl From<UnitQuaternion<f32>> for QuaternionReading {
    fn from(value: UnitQuaternion<f32>) -> Self {
        QuaternionReading {
            x: value.i,
            y: value.j,
            z: value.k,
            w: value.w,
        }
    }
}

/// Anything a sensor source can deliver.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorEvent {
    Motion(DeviceMotionEvent),
    Orientation(DeviceOrientationEvent),
    Quaternion(QuaternionReading),
}

/// A validated motion sample with the bias-corrected rate attached.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionSample {
    pub event: DeviceMotionEvent,
    /// `raw - still`, only on platforms with drift correction.
    pub adjusted_rotation_rate: Option<Vector3<f32>>,
}

impl MotionSample {
    /// The rate to integrate, in degrees per second as `(alpha, beta, gamma)`.
    pub fn rotation_rate(&self) -> Vector3<f32> {
        self.adjusted_rotation_rate.unwrap_or_else(|| {
            self.event
                .rotation_rate
                .map_or_else(Vector3::zeros, |rate| rate.to_vector())
        })
    }

    pub fn gravity(&self) -> Vector3<f32> {
        self.event
            .acceleration_including_gravity
            .map_or_else(Vector3::zeros, |acc| acc.to_vector())
    }
}

/// Smoothed orientation angles in radians, gamma already sign corrected.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EulerSample {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

/// Output of the motion normalizer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NormalizedMotion {
    Motion(MotionSample),
    Orientation(EulerSample),
}
