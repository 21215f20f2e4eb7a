//! Point-to-point ICP.
//!
//! Concrete [`PointSetRegistration`] used by the front end. Each iteration
//! matches every transformed source point to its nearest target point (via
//! an [`Octree`]) within `corr_dist`, solves the best rigid motion for those
//! pairs in closed form (Kabsch / SVD) and composes it onto the running
//! estimate. Iteration stops when the step falls below `tf_epsilon` or after
//! `iterations` rounds; running out of iterations still counts as a result.

use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::octree::Octree;
use crate::registration::{Alignment, PointSetRegistration, RegistrationError};
use crate::transform::{is_finite, transform_points};

const LEAF_CAPACITY: usize = 16;

/// A closed-form rigid fit needs at least three pairs.
const MIN_PAIRS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    /// Step size (translation metres and rotation radians) below which the
    /// estimate is considered converged.
    pub tf_epsilon: f64,
    /// Maximum correspondence distance in metres.
    pub corr_dist: f64,
    /// Maximum number of iterations.
    pub iterations: usize,
    /// Fewer correspondences than this fails the alignment.
    pub min_correspondences: usize,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            tf_epsilon: 1e-10,
            corr_dist: 1.0,
            iterations: 30,
            min_correspondences: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PointToPointIcp {
    config: IcpConfig,
}

impl PointToPointIcp {
    pub fn new(config: IcpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    fn required_pairs(&self) -> usize {
        self.config.min_correspondences.max(MIN_PAIRS)
    }

    /// Pairs of (transformed source point, nearest target point) plus the
    /// summed squared distance.
    fn correspondences(
        &self,
        tree: &Octree,
        source: &[Point3<f64>],
        transform: &Isometry3<f64>,
    ) -> (Vec<Point3<f64>>, Vec<Point3<f64>>, f64) {
        let mut moved = Vec::with_capacity(source.len());
        let mut matched = Vec::with_capacity(source.len());
        let mut error = 0.0;
        for p in source {
            let q = transform * p;
            if let Some((nearest, dist_sq)) = tree.nearest(&q, self.config.corr_dist) {
                moved.push(q);
                matched.push(nearest);
                error += dist_sq;
            }
        }
        (moved, matched, error)
    }
}

impl PointSetRegistration for PointToPointIcp {
    fn align(
        &self,
        source: &[Point3<f64>],
        target: &[Point3<f64>],
        guess: &Isometry3<f64>,
    ) -> Result<Alignment, RegistrationError> {
        if source.is_empty() {
            return Err(RegistrationError::EmptyCloud);
        }
        let tree = Octree::from_points(target, LEAF_CAPACITY).ok_or(RegistrationError::EmptyCloud)?;
        let required = self.required_pairs();

        let mut transform = *guess;
        for iteration in 1..=self.config.iterations {
            let (moved, matched, _) = self.correspondences(&tree, source, &transform);
            if moved.len() < required {
                return Err(RegistrationError::InsufficientCorrespondences {
                    found: moved.len(),
                    required,
                });
            }
            let step = rigid_fit(&moved, &matched).ok_or(RegistrationError::Degenerate)?;
            transform = step * transform;
            if !is_finite(&transform) {
                return Err(RegistrationError::NotConverged { iterations: iteration });
            }
            if step.translation.vector.norm() < self.config.tf_epsilon
                && step.rotation.angle() < self.config.tf_epsilon
            {
                trace!(iteration, "icp converged");
                break;
            }
        }

        let (moved, _, error) = self.correspondences(&tree, source, &transform);
        if moved.len() < required {
            return Err(RegistrationError::InsufficientCorrespondences {
                found: moved.len(),
                required,
            });
        }

        Ok(Alignment {
            transform,
            fitness: error / moved.len() as f64,
            aligned: transform_points(&transform, source),
        })
    }
}

/// Least-squares rigid motion carrying `from` onto `to` (Kabsch).
///
/// Returns `None` when the pairs are collinear or the SVD fails.
fn rigid_fit(from: &[Point3<f64>], to: &[Point3<f64>]) -> Option<Isometry3<f64>> {
    let n = from.len() as f64;
    let centroid_from = from.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let centroid_to = to.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;

    let mut covariance = Matrix3::zeros();
    for (a, b) in from.iter().zip(to) {
        covariance += (a.coords - centroid_from) * (b.coords - centroid_to).transpose();
    }

    let svd = covariance.svd(true, true);
    let scale = svd.singular_values.max();
    if scale <= f64::EPSILON || svd.rank(scale * 1e-9) < 2 {
        return None;
    }
    let u = svd.u?;
    let mut v = svd.v_t?.transpose();
    if (v * u.transpose()).determinant() < 0.0 {
        // Reflection: flip the axis paired with the smallest singular value.
        let weakest = svd.singular_values.imin();
        let flipped = -v.column(weakest);
        v.set_column(weakest, &flipped);
    }
    let rotation = Rotation3::from_matrix_unchecked(v * u.transpose());
    let translation = centroid_to - rotation * centroid_from;
    Some(Isometry3::from_parts(
        Translation3::from(translation),
        UnitQuaternion::from_rotation_matrix(&rotation),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Point3<f64>> {
        let mut points = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                for k in 0..3 {
                    points.push(Point3::new(i as f64, j as f64 * 1.1, k as f64 * 0.9));
                }
            }
        }
        points
    }

    fn icp() -> PointToPointIcp {
        PointToPointIcp::new(IcpConfig {
            tf_epsilon: 1e-10,
            corr_dist: 0.5,
            iterations: 50,
            min_correspondences: 10,
        })
    }

    #[test]
    fn recovers_small_rigid_motion() {
        let source = grid();
        let motion = Isometry3::new(Vector3::new(0.1, -0.05, 0.02), Vector3::new(0.0, 0.0, 0.03));
        let target = transform_points(&motion, &source);

        let alignment = icp().align(&source, &target, &Isometry3::identity()).unwrap();
        let error = motion.inverse() * alignment.transform;
        assert!(error.translation.vector.norm() < 1e-6);
        assert!(error.rotation.angle() < 1e-6);
        assert!(alignment.fitness < 1e-10);
        assert_eq!(alignment.aligned.len(), source.len());
    }

    #[test]
    fn identical_clouds_give_identity() {
        let cloud = grid();
        let alignment = icp().align(&cloud, &cloud, &Isometry3::identity()).unwrap();
        assert!(alignment.transform.translation.vector.norm() < 1e-9);
        assert!(alignment.transform.rotation.angle() < 1e-9);
        assert!(alignment.fitness.abs() < 1e-12);
    }

    #[test]
    fn guess_brings_large_rotation_into_reach() {
        let source = grid();
        let motion = Isometry3::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.2));
        let target = transform_points(&motion, &source);
        let alignment = icp().align(&source, &target, &motion).unwrap();
        assert!((motion.inverse() * alignment.transform).rotation.angle() < 1e-6);
    }

    #[test]
    fn empty_clouds_fail() {
        let cloud = grid();
        assert_eq!(
            icp().align(&[], &cloud, &Isometry3::identity()),
            Err(RegistrationError::EmptyCloud)
        );
        assert_eq!(
            icp().align(&cloud, &[], &Isometry3::identity()),
            Err(RegistrationError::EmptyCloud)
        );
    }

    #[test]
    fn distant_target_has_too_few_correspondences() {
        let source = grid();
        let target = transform_points(&Isometry3::translation(50.0, 0.0, 0.0), &source);
        let result = icp().align(&source, &target, &Isometry3::identity());
        assert!(matches!(
            result,
            Err(RegistrationError::InsufficientCorrespondences { found: 0, .. })
        ));
    }

    #[test]
    fn collinear_pairs_are_degenerate() {
        let line: Vec<Point3<f64>> = (0..10).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        assert!(rigid_fit(&line, &line).is_none());
    }
}
