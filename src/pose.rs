use std::f32::consts::PI;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

use crate::math::{x_axis, y_axis, z_axis};
use crate::sample::{EulerSample, MotionSample, NormalizedMotion};

/// Below this (m/s²) the accelerometer says nothing useful about gravity.
const MIN_GRAVITY: f32 = 1.0;

/// Complementary filter turning normalized motion into device attitude.
///
/// The attitude maps device coordinates into the Z-up sensor frame. Motion
/// samples are dead-reckoned from the angular rate and nudged toward the
/// measured gravity direction; orientation samples replace the attitude
/// outright. The first usable gravity reading seeds the tilt directly.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimator {
    attitude: UnitQuaternion<f32>,
    gravity_gain: f32,
    initialized: bool,
}

impl PoseEstimator {
    pub fn new(gravity_gain: f32) -> Self {
        Self {
            attitude: UnitQuaternion::identity(),
            gravity_gain,
            initialized: false,
        }
    }

    pub fn attitude(&self) -> UnitQuaternion<f32> {
        self.attitude
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn update(&mut self, motion: &NormalizedMotion) -> UnitQuaternion<f32> {
        match motion {
            NormalizedMotion::Motion(sample) => self.integrate(sample),
            NormalizedMotion::Orientation(euler) => {
                self.attitude = from_euler(euler);
                self.initialized = true;
            }
        }
        self.attitude
    }

    fn integrate(&mut self, sample: &MotionSample) {
        let gravity = sample.gravity();
        if !self.initialized && gravity.norm() >= MIN_GRAVITY {
            self.seed(&gravity);
        }

        let rate = sample.rotation_rate();
        // alpha/beta/gamma turn about the device z/x/y axes
        let omega = Vector3::new(rate.y, rate.z, rate.x).map(f32::to_radians);
        let dt = sample.event.interval / 1000.0;
        self.attitude *= UnitQuaternion::from_scaled_axis(omega * dt);

        if gravity.norm() < MIN_GRAVITY {
            return;
        }

        // the accelerometer reads +g along the device axis pointing up
        let measured_up = self.attitude * gravity.normalize();
        if let Some(correction) =
            UnitQuaternion::scaled_rotation_between(&measured_up, &Vector3::z(), self.gravity_gain)
        {
            self.attitude = correction * self.attitude;
        }
    }

    /// Level the attitude straight onto the measured gravity.
    fn seed(&mut self, gravity: &Vector3<f32>) {
        // upside down has no unique shortest rotation
        self.attitude = UnitQuaternion::rotation_between(gravity, &Vector3::z())
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&x_axis(), PI));
        self.initialized = true;
        debug!(?gravity, "Attitude seeded from gravity");
    }
}

/// Intrinsic Z-X'-Y'' rotation of the platform orientation angles.
pub fn from_euler(euler: &EulerSample) -> UnitQuaternion<f32> {
    UnitQuaternion::from_axis_angle(&z_axis(), euler.alpha)
        * UnitQuaternion::from_axis_angle(&x_axis(), euler.beta)
        * UnitQuaternion::from_axis_angle(&y_axis(), euler.gamma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Acceleration, DeviceMotionEvent, RotationRate};
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    fn turning(alpha_rate: f32, gravity: [f32; 3]) -> NormalizedMotion {
        NormalizedMotion::Motion(MotionSample {
            event: DeviceMotionEvent {
                interval: 10.0,
                timestamp: 0.0,
                rotation_rate: Some(RotationRate {
                    alpha: Some(alpha_rate),
                    beta: Some(0.0),
                    gamma: Some(0.0),
                }),
                acceleration_including_gravity: Some(Acceleration {
                    x: Some(gravity[0]),
                    y: Some(gravity[1]),
                    z: Some(gravity[2]),
                }),
                acceleration: None,
            },
            adjusted_rotation_rate: None,
        })
    }

    #[test]
    fn integrates_rate_about_device_z() {
        let mut pose = PoseEstimator::new(0.02);
        // 90 °/s for one second, lying flat
        for _ in 0..100 {
            pose.update(&turning(90.0, [0.0, 0.0, 9.81]));
        }
        let (roll, pitch, yaw) = pose.attitude().euler_angles();
        assert_relative_eq!(yaw, FRAC_PI_2, epsilon = 1e-3);
        assert_relative_eq!(roll, 0.0, epsilon = 1e-3);
        assert_relative_eq!(pitch, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn first_gravity_reading_seeds_tilt() {
        let mut pose = PoseEstimator::new(0.02);
        // held upright, screen facing the user
        let attitude = pose.update(&turning(0.0, [0.0, 9.81, 0.0]));
        assert!(pose.is_initialized());

        let view = attitude * Vector3::new(0.0, 0.0, -1.0);
        let elevation = view.z.asin().to_degrees();
        assert_relative_eq!(elevation, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn upside_down_seed_is_defined() {
        let mut pose = PoseEstimator::new(0.02);
        let attitude = pose.update(&turning(0.0, [0.0, 0.0, -9.81]));
        assert_relative_eq!(attitude * Vector3::new(0.0, 0.0, -1.0), Vector3::z(), epsilon = 1e-5);
    }

    #[test]
    fn gravity_pulls_tilt_back() {
        let mut pose = PoseEstimator::new(0.1);
        // seeded flat, then stood upright without any reported rotation
        pose.update(&turning(0.0, [0.0, 0.0, 9.81]));
        for _ in 0..400 {
            pose.update(&turning(0.0, [0.0, 9.81, 0.0]));
        }
        let up_in_device = pose.attitude().inverse() * Vector3::z();
        assert_relative_eq!(up_in_device, Vector3::y(), epsilon = 1e-3);
    }

    #[test]
    fn free_fall_skips_correction() {
        let mut pose = PoseEstimator::new(1.0);
        pose.update(&turning(0.0, [0.0, 0.1, 0.0]));
        assert_eq!(pose.attitude(), UnitQuaternion::identity());
        assert!(!pose.is_initialized());
    }

    #[test]
    fn upright_euler_points_forward_north() {
        let attitude = from_euler(&EulerSample {
            alpha: 0.0,
            beta: FRAC_PI_2,
            gamma: 0.0,
        });
        assert_relative_eq!(attitude * Vector3::new(0.0, 0.0, -1.0), Vector3::y(), epsilon = 1e-6);
    }
}
