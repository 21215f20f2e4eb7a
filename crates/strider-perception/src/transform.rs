//! Rigid-transform helpers shared by the registration engine and the map
//! manager.
//!
//! All poses are [`Isometry3<f64>`] with the convention that `a * b` applies
//! `b` first.  The *delta* between two poses is `a⁻¹ · b`, i.e. `b`
//! expressed in the frame of `a`.
//!
//! # Example
//!
//! ```rust
//! use nalgebra::{Isometry3, Vector3};
//! use strider_perception::transform::{pose_delta, translation_magnitude};
//!
//! let a = Isometry3::translation(1.0, 0.0, 0.0);
//! let b = Isometry3::translation(1.0, 2.0, 0.0);
//! let d = pose_delta(&a, &b);
//! assert!((translation_magnitude(&d) - 2.0).abs() < 1e-12);
//! assert!((d.translation.vector - Vector3::new(0.0, 2.0, 0.0)).norm() < 1e-12);
//! ```

use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion};

/// `b` expressed in the frame of `a`.
pub fn pose_delta(a: &Isometry3<f64>, b: &Isometry3<f64>) -> Isometry3<f64> {
    a.inverse() * b
}

/// Euclidean norm of the translation part.
pub fn translation_magnitude(t: &Isometry3<f64>) -> f64 {
    t.translation.vector.norm()
}

/// Rotation angle of the transform in radians, in `[0, π]`.
pub fn rotation_magnitude(t: &Isometry3<f64>) -> f64 {
    t.rotation.angle()
}

/// Pure rotation about the origin, zero translation.
pub fn rotation_only(rotation: UnitQuaternion<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(Translation3::identity(), rotation)
}

/// Apply `t` to every point.
pub fn transform_points(t: &Isometry3<f64>, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
    points.iter().map(|p| t * p).collect()
}

/// True when every component of the transform is finite.
pub fn is_finite(t: &Isometry3<f64>) -> bool {
    t.translation.vector.iter().all(|v| v.is_finite())
        && t.rotation.coords.iter().all(|v| v.is_finite())
}
