//! Attitude-delta extraction.
//!
//! Turns two raw orientation samples of the same source into the rotation
//! that carries the previous sample onto the current one:
//!
//! ```text
//! delta = previous⁻¹ · current
//! ```
//!
//! In [`AttitudeMode::YawOnly`] the delta is projected onto the vertical
//! axis, discarding roll and pitch.  Samples with NaN components or a
//! quaternion too small to normalise are rejected with an
//! [`AttitudeError`] instead of leaking into the delta.

use nalgebra::{Quaternion, UnitQuaternion};
use thiserror::Error;

/// Squared norm below which a quaternion cannot be normalised.
const MIN_NORM_SQUARED: f64 = 1e-12;

/// Which part of the relative rotation is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttitudeMode {
    /// Full 3-axis delta.
    Full,
    /// Heading only; roll and pitch are treated as ground-referenced.
    YawOnly,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AttitudeError {
    #[error("orientation contains NaN components")]
    NaN,

    #[error("orientation quaternion is too close to zero to normalise")]
    Degenerate,
}

/// Validate and normalise a raw orientation.
pub fn unit_orientation(q: &Quaternion<f64>) -> Result<UnitQuaternion<f64>, AttitudeError> {
    if q.coords.iter().any(|v| v.is_nan()) {
        return Err(AttitudeError::NaN);
    }
    if q.norm_squared() < MIN_NORM_SQUARED {
        return Err(AttitudeError::Degenerate);
    }
    Ok(UnitQuaternion::from_quaternion(*q))
}

/// Relative rotation from `previous` to `current`.
pub fn attitude_delta(
    previous: &Quaternion<f64>,
    current: &Quaternion<f64>,
    mode: AttitudeMode,
) -> Result<UnitQuaternion<f64>, AttitudeError> {
    let previous = unit_orientation(previous)?;
    let current = unit_orientation(current)?;
    Ok(relative_rotation(&previous, &current, mode))
}

/// [`attitude_delta`] for already validated orientations.
pub fn relative_rotation(
    previous: &UnitQuaternion<f64>,
    current: &UnitQuaternion<f64>,
    mode: AttitudeMode,
) -> UnitQuaternion<f64> {
    let delta = previous.inverse() * current;
    match mode {
        AttitudeMode::Full => delta,
        AttitudeMode::YawOnly => yaw_only(&delta),
    }
}

/// Keep only the rotation about the vertical axis.
pub fn yaw_only(rotation: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    let (_, _, yaw) = rotation.euler_angles();
    UnitQuaternion::from_euler_angles(0.0, 0.0, yaw)
}

/// Re-express an orientation measured in a sensor frame in the body frame,
/// given the fixed sensor-to-body rotation: `q_b = q_sb · q · q_sb⁻¹`.
pub fn to_body_frame(
    sensor_to_body: &UnitQuaternion<f64>,
    orientation: &UnitQuaternion<f64>,
) -> UnitQuaternion<f64> {
    sensor_to_body * orientation * sensor_to_body.inverse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    const EPS: f64 = 1e-9;

    fn raw(q: UnitQuaternion<f64>) -> Quaternion<f64> {
        *q.quaternion()
    }

    #[test]
    fn delta_of_sample_with_itself_is_identity() {
        let q = raw(UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1));
        for mode in [AttitudeMode::Full, AttitudeMode::YawOnly] {
            let delta = attitude_delta(&q, &q, mode).unwrap();
            assert!(delta.angle() < EPS);
        }
    }

    #[test]
    fn yaw_only_of_pure_yaw_equals_full() {
        let previous = raw(UnitQuaternion::from_euler_angles(0.0, 0.0, 0.2));
        let current = raw(UnitQuaternion::from_euler_angles(0.0, 0.0, 0.2 + FRAC_PI_4));
        let full = attitude_delta(&previous, &current, AttitudeMode::Full).unwrap();
        let yaw = attitude_delta(&previous, &current, AttitudeMode::YawOnly).unwrap();
        assert!(full.angle_to(&yaw) < EPS);
        assert!((full.euler_angles().2 - FRAC_PI_4).abs() < EPS);
    }

    #[test]
    fn yaw_only_of_pure_roll_is_identity() {
        let previous = Quaternion::identity();
        let current = raw(UnitQuaternion::from_euler_angles(0.4, 0.0, 0.0));
        let yaw = attitude_delta(&previous, &current, AttitudeMode::YawOnly).unwrap();
        assert!(yaw.angle() < EPS);
        let full = attitude_delta(&previous, &current, AttitudeMode::Full).unwrap();
        assert!((full.angle() - 0.4).abs() < EPS);
    }

    #[test]
    fn delta_is_relative_to_previous_frame() {
        let previous = raw(UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2));
        let current = raw(UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2 + 0.1));
        let delta = attitude_delta(&previous, &current, AttitudeMode::Full).unwrap();
        assert!((delta.euler_angles().2 - 0.1).abs() < EPS);
    }

    #[test]
    fn nan_sample_is_rejected() {
        let good = Quaternion::identity();
        let bad = Quaternion::new(f64::NAN, 0.0, 0.0, 0.0);
        assert_eq!(
            attitude_delta(&good, &bad, AttitudeMode::Full),
            Err(AttitudeError::NaN)
        );
        assert_eq!(
            attitude_delta(&bad, &good, AttitudeMode::YawOnly),
            Err(AttitudeError::NaN)
        );
    }

    #[test]
    fn zero_quaternion_is_degenerate() {
        let zero = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(unit_orientation(&zero), Err(AttitudeError::Degenerate));
    }

    #[test]
    fn body_frame_conversion_with_identity_extrinsic_is_noop() {
        let q = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let converted = to_body_frame(&UnitQuaternion::identity(), &q);
        assert!(converted.angle_to(&q) < EPS);
    }

    #[test]
    fn body_frame_conversion_maps_sensor_axis() {
        // Sensor mounted rolled by 90°: a rotation about the sensor Z axis is
        // a rotation about the body -Y axis.
        let mount = UnitQuaternion::from_euler_angles(FRAC_PI_2, 0.0, 0.0);
        let about_sensor_z = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3);
        let converted = to_body_frame(&mount, &about_sensor_z);
        let axis = converted.axis().unwrap();
        assert!((axis.y.abs() - 1.0).abs() < 1e-6);
        assert!((converted.angle() - 0.3).abs() < EPS);
    }
}
