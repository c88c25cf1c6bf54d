//! Orientation fusion: calibration of raw sensor attitude, frame-to-frame
//! yaw/pitch deltas and the combined render quaternion.

use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::math::{forward, heading_offset, rotate_axis, sensor_to_render, x_axis, y_axis, z_axis};

/// Yaw and pitch in degrees. Positive yaw looks right, positive pitch up.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct YawPitch {
    pub yaw: f32,
    pub pitch: f32,
}

impl YawPitch {
    pub const ZERO: YawPitch = YawPitch { yaw: 0.0, pitch: 0.0 };
}

/// One-time heading calibration.
///
/// The offset stays the identity until a reading with a non-zero heading
/// offset arrives; a zero offset is what some platforms report before the
/// sensor is ready, so those readings are skipped rather than accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    offset: UnitQuaternion<f32>,
    calibrated: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            offset: UnitQuaternion::identity(),
            calibrated: false,
        }
    }
}

impl Calibration {
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Yaw rotation about the sensor up axis.
    pub fn offset(&self) -> UnitQuaternion<f32> {
        self.offset
    }

    /// Feed a raw reading. Returns `true` when this reading calibrated.
    pub fn observe(&mut self, sensor: &UnitQuaternion<f32>) -> bool {
        if self.calibrated {
            return false;
        }

        let yaw = heading_offset(sensor);
        if yaw == 0.0 {
            debug!("Heading offset is zero, sensor not ready yet");
            return false;
        }

        self.offset *= UnitQuaternion::from_axis_angle(&z_axis(), yaw);
        self.calibrated = true;
        info!(yaw_degrees = yaw.to_degrees(), "Heading calibrated");
        true
    }

    /// Convert a raw reading into the calibrated render-frame orientation.
    pub fn apply(&self, sensor: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
        sensor_to_render() * self.offset * sensor
    }
}

/// Calibration plus the latest calibrated orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationFusion {
    calibration: Calibration,
    orientation: UnitQuaternion<f32>,
}

impl Default for OrientationFusion {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            orientation: UnitQuaternion::identity(),
        }
    }
}

impl OrientationFusion {
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn orientation(&self) -> UnitQuaternion<f32> {
        self.orientation
    }

    /// Take a new sensor reading and return the updated orientation.
    pub fn update(&mut self, sensor: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
        self.calibration.observe(sensor);
        self.orientation = self.calibration.apply(sensor);
        self.orientation
    }
}

/// Yaw and pitch turned between two render-frame orientations, in degrees.
///
/// The relative rotation is taken in the world frame; yaw is its component
/// about world up and pitch its component about the device's right axis at
/// `current`.
pub fn yaw_pitch_between(previous: &UnitQuaternion<f32>, current: &UnitQuaternion<f32>) -> YawPitch {
    let relative = current * previous.inverse();
    let rotation = relative.scaled_axis();
    let right = current * Vector3::x();

    YawPitch {
        yaw: -rotation.dot(&Vector3::y()).to_degrees(),
        pitch: rotation.dot(&right).to_degrees(),
    }
}

/// Previous-snapshot bookkeeping behind delta queries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeltaTracker {
    previous: Option<UnitQuaternion<f32>>,
}

impl DeltaTracker {
    /// Delta since the last call.
    ///
    /// Without a current orientation, or on the first call, this is
    /// [`YawPitch::ZERO`]; the first call only records the snapshot.
    pub fn delta(&mut self, current: Option<UnitQuaternion<f32>>) -> YawPitch {
        let Some(current) = current else {
            return YawPitch::ZERO;
        };
        let Some(previous) = self.previous.replace(current) else {
            return YawPitch::ZERO;
        };
        yaw_pitch_between(&previous, &current)
    }

    pub fn previous(&self) -> Option<UnitQuaternion<f32>> {
        self.previous
    }

    pub fn clear(&mut self) {
        self.previous = None;
    }
}

/// The render quaternion for a device orientation plus user yaw/pitch.
///
/// `yaw` and `pitch` are degrees. The pitch axis is the world right axis
/// turned with the screen, so pitching stays vertical on a rotated display.
/// Composition is pitch, then the inverted device rotation, then yaw, which
/// keeps yaw about world up.
pub fn combine(
    device: &UnitQuaternion<f32>,
    yaw: f32,
    pitch: f32,
    screen_radians: f32,
) -> UnitQuaternion<f32> {
    let forward_axis = Unit::new_normalize(forward());
    let pitch_axis = rotate_axis(&x_axis(), &forward_axis, -screen_radians);

    let yaw_q = UnitQuaternion::from_axis_angle(&y_axis(), (-yaw).to_radians());
    let pitch_q = UnitQuaternion::from_axis_angle(&pitch_axis, (-pitch).to_radians());

    pitch_q * device.conjugate() * yaw_q
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f32::consts::FRAC_PI_2;

    fn facing(heading_degrees: f32) -> UnitQuaternion<f32> {
        UnitQuaternion::from_axis_angle(&z_axis(), heading_degrees.to_radians())
            * UnitQuaternion::from_axis_angle(&x_axis(), FRAC_PI_2)
    }

    #[test]
    fn calibration_waits_for_nonzero_heading() {
        let mut fusion = OrientationFusion::default();

        fusion.update(&facing(0.0));
        assert!(!fusion.calibration().is_calibrated());
        fusion.update(&facing(0.0));
        assert!(!fusion.calibration().is_calibrated());
        assert_eq!(fusion.calibration().offset(), UnitQuaternion::identity());

        fusion.update(&facing(15.0));
        assert!(fusion.calibration().is_calibrated());
        assert_relative_eq!(
            fusion.calibration().offset().angle(),
            15.0_f32.to_radians(),
            epsilon = 1e-5
        );
        // the calibrating reading now faces scene forward
        assert_relative_eq!(fusion.orientation(), UnitQuaternion::identity(), epsilon = 1e-5);
    }

    #[test]
    fn calibration_runs_once() {
        let mut calibration = Calibration::default();
        assert!(calibration.observe(&facing(15.0)));
        let offset = calibration.offset();
        assert!(!calibration.observe(&facing(40.0)));
        assert_eq!(calibration.offset(), offset);
    }

    #[test]
    fn first_delta_is_zero() {
        let mut tracker = DeltaTracker::default();
        assert_eq!(tracker.delta(Some(facing(33.0))), YawPitch::ZERO);
        assert!(tracker.previous().is_some());
    }

    #[test]
    fn missing_orientation_is_zero() {
        let mut tracker = DeltaTracker::default();
        assert_eq!(tracker.delta(None), YawPitch::ZERO);
        assert!(tracker.previous().is_none());
    }

    #[test]
    fn identical_readings_have_no_delta() {
        let mut tracker = DeltaTracker::default();
        let q = UnitQuaternion::from_euler_angles(0.2, 0.7, -0.4);
        tracker.delta(Some(q));
        let delta = tracker.delta(Some(q));
        assert_abs_diff_eq!(delta.yaw, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(delta.pitch, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn turning_right_is_positive_yaw() {
        let start = UnitQuaternion::identity();
        let turned = UnitQuaternion::from_axis_angle(&y_axis(), (-10.0_f32).to_radians()) * start;
        let delta = yaw_pitch_between(&start, &turned);
        assert_relative_eq!(delta.yaw, 10.0, epsilon = 1e-4);
        assert_abs_diff_eq!(delta.pitch, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn tilting_up_is_positive_pitch() {
        let start = UnitQuaternion::from_axis_angle(&y_axis(), 0.8);
        let tilted = start * UnitQuaternion::from_axis_angle(&x_axis(), 5.0_f32.to_radians());
        let delta = yaw_pitch_between(&start, &tilted);
        assert_relative_eq!(delta.pitch, 5.0, epsilon = 1e-4);
        assert_abs_diff_eq!(delta.yaw, 0.0, epsilon = 1e-4);

        let view = tilted * forward();
        assert!(view.y > 0.0);
    }

    #[test]
    fn zero_input_on_identity_is_identity() {
        for screen in [0.0, FRAC_PI_2, 3.0 * FRAC_PI_2] {
            let out = combine(&UnitQuaternion::identity(), 0.0, 0.0, screen);
            assert_relative_eq!(out, UnitQuaternion::identity(), epsilon = 1e-6);
        }
    }

    #[test]
    fn composition_order_matters() {
        let device = UnitQuaternion::from_euler_angles(0.4, 0.0, 0.3);
        let yaw = 30.0_f32;
        let pitch = 20.0_f32;

        let out = combine(&device, yaw, pitch, 0.0);

        let yaw_q = UnitQuaternion::from_axis_angle(&y_axis(), (-yaw).to_radians());
        let pitch_q = UnitQuaternion::from_axis_angle(&x_axis(), (-pitch).to_radians());
        let reordered = yaw_q * pitch_q * device.conjugate();
        assert_relative_eq!(out, pitch_q * device.conjugate() * yaw_q, epsilon = 1e-6);
        assert!(out.angle_to(&reordered) > 1e-3);
    }

    #[test]
    fn yaw_stays_about_world_up() {
        let device = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.0);
        let base = combine(&device, 0.0, 0.0, 0.0);
        let yawed = combine(&device, 25.0, 0.0, 0.0);
        // yaw only post-multiplies, a rotation of the world about +Y
        let world_step = base.inverse() * yawed;
        let axis = world_step.axis().unwrap();
        assert_relative_eq!(axis.into_inner().y.abs(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(world_step.angle(), 25.0_f32.to_radians(), epsilon = 1e-5);
    }

    #[test]
    fn pitch_axis_follows_screen_rotation() {
        let device = UnitQuaternion::identity();
        let portrait = combine(&device, 0.0, 10.0, 0.0);
        let landscape = combine(&device, 0.0, 10.0, FRAC_PI_2);

        let portrait_axis = portrait.axis().unwrap().into_inner();
        let landscape_axis = landscape.axis().unwrap().into_inner();
        assert_relative_eq!(portrait_axis.x.abs(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(landscape_axis.y.abs(), 1.0, epsilon = 1e-5);
    }
}
