//! Point-cloud registration engine.
//!
//! [`PointCloudOdometry`] drives a [`PointSetRegistration`] capability
//! scan-to-scan (or scan-to-map), seeds it with a rotation-only initial guess,
//! thresholds the result and composes the accepted increment into the
//! integrated pose.
//!
//! # Lifecycle
//!
//! ```text
//!  Idle ──set_scan──▶ AwaitingScan ──set_scan + update_estimate──▶ Registering
//!                                                                     │
//!                     ┌───────────────────┬───────────────────────────┤
//!                     ▼                   ▼                           ▼
//!                 Accepted        RejectedThreshold          FailedConvergence
//! ```
//!
//! `RejectedThreshold` and `FailedConvergence` both resolve to an identity
//! increment; the engine keeps running.

use nalgebra::{Isometry3, Point3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::transform::{is_finite, rotation_magnitude, rotation_only, transform_points, translation_magnitude};

/// Fitness reported when registration failed to produce a transform.
pub const FAILED_FITNESS: f64 = -1.0;

// ────────────────────────────────────────────────────────────────────────────
// Registration capability
// ────────────────────────────────────────────────────────────────────────────

/// Output of a successful alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    /// Transform mapping `source` points onto `target`.
    pub transform: Isometry3<f64>,
    /// Mean squared correspondence distance; lower is better.
    pub fitness: f64,
    /// `source` moved by `transform`.
    pub aligned: Vec<Point3<f64>>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("cannot register an empty point set")]
    EmptyCloud,

    #[error("only {found} correspondences found, {required} required")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("registration did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("degenerate correspondence geometry")]
    Degenerate,

    #[error("registration produced a non-finite transform")]
    NonFinite,
}

/// Black-box point-set registration: align `source` onto `target` starting
/// from `guess`.
pub trait PointSetRegistration {
    fn align(
        &self,
        source: &[Point3<f64>],
        target: &[Point3<f64>],
        guess: &Isometry3<f64>,
    ) -> Result<Alignment, RegistrationError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Engine settings and state
// ────────────────────────────────────────────────────────────────────────────

/// What the current scan is registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    /// The previous scan, in its own frame.
    #[default]
    PreviousScan,
    /// The local keyframe map, in the fixed frame.
    LocalMap,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometrySettings {
    pub transform_thresholding: bool,
    /// Metres.
    pub max_translation: f64,
    /// Radians.
    pub max_rotation: f64,
    pub reference: ReferenceMode,
}

impl Default for OdometrySettings {
    fn default() -> Self {
        Self {
            transform_thresholding: false,
            max_translation: 1.0,
            max_rotation: 1.0,
            reference: ReferenceMode::PreviousScan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// No scan received yet.
    Idle,
    /// One scan stored as reference; waiting for the next.
    AwaitingScan,
    Registering,
    Accepted,
    RejectedThreshold,
    FailedConvergence,
}

impl RegistrationState {
    /// True for outcomes that forced an identity increment.
    pub fn is_degraded(self) -> bool {
        matches!(
            self,
            RegistrationState::RejectedThreshold | RegistrationState::FailedConvergence
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PointCloudOdometry
// ────────────────────────────────────────────────────────────────────────────

/// Scan registration with thresholded acceptance.
///
/// `integrated` is only ever changed by right-multiplying an increment, so
/// it starts from identity (or the pose given to
/// [`with_initial_pose`][Self::with_initial_pose]) and is never reset.
#[derive(Debug)]
pub struct PointCloudOdometry<R> {
    registration: R,
    settings: OdometrySettings,
    state: RegistrationState,
    query: Vec<Point3<f64>>,
    previous_scan: Vec<Point3<f64>>,
    /// Fixed-frame reference used in [`ReferenceMode::LocalMap`].
    map_reference: Vec<Point3<f64>>,
    stamp: f64,
    rotation_hypothesis: Option<UnitQuaternion<f64>>,
    initial_guess: Isometry3<f64>,
    incremental: Isometry3<f64>,
    integrated: Isometry3<f64>,
    fitness: f64,
    aligned: Vec<Point3<f64>>,
}

impl<R: PointSetRegistration> PointCloudOdometry<R> {
    pub fn new(registration: R, settings: OdometrySettings) -> Self {
        Self {
            registration,
            settings,
            state: RegistrationState::Idle,
            query: Vec::new(),
            previous_scan: Vec::new(),
            map_reference: Vec::new(),
            stamp: 0.0,
            rotation_hypothesis: None,
            initial_guess: Isometry3::identity(),
            incremental: Isometry3::identity(),
            integrated: Isometry3::identity(),
            fitness: FAILED_FITNESS,
            aligned: Vec::new(),
        }
    }

    /// Start integrating from `pose` instead of the identity.
    pub fn with_initial_pose(mut self, pose: Isometry3<f64>) -> Self {
        self.integrated = pose;
        self
    }

    /// Store the scan to register on the next
    /// [`update_estimate`][Self::update_estimate].
    pub fn set_scan(&mut self, points: Vec<Point3<f64>>, stamp: f64) {
        self.query = points;
        self.stamp = stamp;
    }

    /// Rotation delta since the previous scan; `None` seeds registration with
    /// the identity.
    pub fn set_rotation_hypothesis(&mut self, rotation: Option<UnitQuaternion<f64>>) {
        self.rotation_hypothesis = rotation;
    }

    /// Replace the fixed-frame map used in [`ReferenceMode::LocalMap`].
    pub fn set_map_reference(&mut self, points: Vec<Point3<f64>>) {
        self.map_reference = points;
    }

    /// Register the stored scan and update the pose state.
    ///
    /// The first scan only becomes the reference. Every later call produces
    /// an increment, forced to identity on failure or threshold violation.
    pub fn update_estimate(&mut self) -> RegistrationState {
        let against_map =
            self.settings.reference == ReferenceMode::LocalMap && !self.map_reference.is_empty();
        if self.state == RegistrationState::Idle && !against_map {
            self.previous_scan = std::mem::take(&mut self.query);
            self.incremental = Isometry3::identity();
            self.state = RegistrationState::AwaitingScan;
            debug!(stamp = self.stamp, "first scan stored as registration reference");
            return self.state;
        }

        self.state = RegistrationState::Registering;
        let hypothesis = self.rotation_hypothesis.map(rotation_only).unwrap_or_else(Isometry3::identity);

        let (target, guess) = if against_map {
            (&self.map_reference, self.integrated * hypothesis)
        } else {
            (&self.previous_scan, hypothesis)
        };
        self.initial_guess = guess;

        let result = self
            .registration
            .align(&self.query, target, &guess)
            .map(|alignment| {
                let incremental = if against_map {
                    self.integrated.inverse() * alignment.transform
                } else {
                    alignment.transform
                };
                (alignment, incremental)
            })
            .and_then(|(alignment, incremental)| {
                if is_finite(&incremental) {
                    Ok((alignment, incremental))
                } else {
                    Err(RegistrationError::NonFinite)
                }
            });
        let (state, incremental) = match result {
            Ok((alignment, incremental)) => {
                self.fitness = alignment.fitness;
                self.aligned = alignment.aligned;
                if self.exceeds_thresholds(&incremental) {
                    warn!(
                        stamp = self.stamp,
                        translation = translation_magnitude(&incremental),
                        rotation = rotation_magnitude(&incremental),
                        "implausible registration jump rejected"
                    );
                    (RegistrationState::RejectedThreshold, Isometry3::identity())
                } else {
                    (RegistrationState::Accepted, incremental)
                }
            }
            Err(e) => {
                warn!(stamp = self.stamp, error = %e, "registration failed, assuming no motion");
                self.fitness = FAILED_FITNESS;
                self.aligned = transform_points(&guess, &self.query);
                (RegistrationState::FailedConvergence, Isometry3::identity())
            }
        };

        self.incremental = incremental;
        self.integrated *= incremental;
        self.previous_scan = std::mem::take(&mut self.query);
        self.state = state;
        self.state
    }

    fn exceeds_thresholds(&self, incremental: &Isometry3<f64>) -> bool {
        self.settings.transform_thresholding
            && (translation_magnitude(incremental) > self.settings.max_translation
                || rotation_magnitude(incremental) > self.settings.max_rotation)
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn incremental_estimate(&self) -> &Isometry3<f64> {
        &self.incremental
    }

    pub fn integrated_estimate(&self) -> &Isometry3<f64> {
        &self.integrated
    }

    /// Guess handed to the registration capability on the last update.
    pub fn initial_guess(&self) -> &Isometry3<f64> {
        &self.initial_guess
    }

    /// Fitness of the last registration, [`FAILED_FITNESS`] after a failure.
    pub fn fitness_score(&self) -> f64 {
        self.fitness
    }

    /// Last query scan as moved by registration.
    pub fn aligned_points(&self) -> &[Point3<f64>] {
        &self.aligned
    }

    pub fn settings(&self) -> &OdometrySettings {
        &self.settings
    }
}
