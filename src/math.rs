use std::f32::consts::{FRAC_PI_2, PI, TAU};

use nalgebra::{Unit, UnitQuaternion, Vector2, Vector3};

/// Projections shorter than this have no usable heading.
const DEGENERATE_PROJECTION: f32 = 1e-6;

pub fn x_axis() -> Unit<Vector3<f32>> {
    Vector3::x_axis()
}

pub fn y_axis() -> Unit<Vector3<f32>> {
    Vector3::y_axis()
}

pub fn z_axis() -> Unit<Vector3<f32>> {
    Vector3::z_axis()
}

/// The direction an unrotated device looks at, out of the back of the screen.
pub fn forward() -> Vector3<f32> {
    Vector3::new(0.0, 0.0, -1.0)
}

/// Rotation from the Z-up sensor frame into the Y-up render frame.
pub fn sensor_to_render() -> UnitQuaternion<f32> {
    UnitQuaternion::from_axis_angle(&x_axis(), -FRAC_PI_2)
}

/// Wraps an angle in radians into (-π, π].
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// Wraps an angle in degrees into [0, 360).
pub fn normalize_degrees(degrees: f32) -> f32 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can round up to the modulus for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Yaw (about sensor Z) that turns the device heading onto sensor north.
///
/// `quat` is a raw sensor reading in the Z-up sensor frame. The device
/// forward vector is rotated into that frame and projected on the horizontal
/// plane; the returned angle (radians, wrapped into (-π, π]) rotates the
/// projection onto +Y. A device looking straight up or down has no heading
/// and yields exactly `0.0`, the same value an uninitialised sensor reports.
pub fn heading_offset(quat: &UnitQuaternion<f32>) -> f32 {
    let view = quat * forward();
    let horizontal = Vector2::new(view.x, view.y);
    if horizontal.norm() < DEGENERATE_PROJECTION {
        return 0.0;
    }
    wrap_angle(FRAC_PI_2 - horizontal.y.atan2(horizontal.x))
}

/// Rotates `axis` by `angle` radians about `about`.
pub fn rotate_axis(axis: &Unit<Vector3<f32>>, about: &Unit<Vector3<f32>>, angle: f32) -> Unit<Vector3<f32>> {
    UnitQuaternion::from_axis_angle(about, angle) * *axis
}
