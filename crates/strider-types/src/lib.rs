//! `strider-types` – shared data model for the Strider LiDAR-inertial front end.
//!
//! Every crate in the workspace speaks in terms of these types:
//!
//! - **Measurements** – [`PointCloud`], [`ImuSample`], [`OdometrySample`] and
//!   [`PoseStampedSample`], unified by the [`Measurement`] sum type and the
//!   [`SensorType`] discriminant.
//! - **Outputs** – [`PoseEstimate`], [`FrontendDiagnostics`] and
//!   [`StageTimings`].
//! - **Bus envelope** – [`Event`] / [`EventPayload`].
//! - **Errors** – [`StriderError`].

use chrono::{DateTime, Utc};
use nalgebra::{Isometry3, Point3, Quaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Message header
// ────────────────────────────────────────────────────────────────────────────

/// Metadata shared by every sensor message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Producer-side sequence number; gaps indicate dropped messages.
    #[serde(default)]
    pub seq: u64,
    /// Acquisition time in seconds.
    pub stamp: f64,
    /// Coordinate frame the payload is expressed in.
    #[serde(default)]
    pub frame_id: String,
}

impl Header {
    pub fn new(seq: u64, stamp: f64, frame_id: impl Into<String>) -> Self {
        Self {
            seq,
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// Anything carrying an acquisition timestamp.
pub trait Stamped {
    /// Acquisition time in seconds.
    fn stamp(&self) -> f64;
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor payloads
// ────────────────────────────────────────────────────────────────────────────

/// One LiDAR acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub header: Header,
    pub points: Vec<Point3<f64>>,
}

impl PointCloud {
    pub fn new(header: Header, points: Vec<Point3<f64>>) -> Self {
        Self { header, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// A 6-DoF pose as delivered on the wire.
///
/// The orientation is kept as a raw (possibly non-unit, possibly NaN)
/// quaternion: validation happens where the pose is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub orientation: Quaternion<f64>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, orientation: Quaternion<f64>) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), Quaternion::identity())
    }

    /// True when any component of the position or orientation is NaN.
    pub fn has_nan(&self) -> bool {
        self.position.iter().any(|v| v.is_nan()) || self.orientation.coords.iter().any(|v| v.is_nan())
    }
}

/// Attitude sample from an inertial measurement unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub header: Header,
    /// Orientation of the IMU frame, `[x, y, z, w]` on the wire.
    pub orientation: Quaternion<f64>,
}

/// Wheel / visual odometry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdometrySample {
    pub header: Header,
    #[serde(default)]
    pub child_frame_id: String,
    pub pose: Pose,
}

/// Externally supplied pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseStampedSample {
    pub header: Header,
    pub pose: Pose,
}

impl Stamped for PointCloud {
    fn stamp(&self) -> f64 {
        self.header.stamp
    }
}

impl Stamped for ImuSample {
    fn stamp(&self) -> f64 {
        self.header.stamp
    }
}

impl Stamped for OdometrySample {
    fn stamp(&self) -> f64 {
        self.header.stamp
    }
}

impl Stamped for PoseStampedSample {
    fn stamp(&self) -> f64 {
        self.header.stamp
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Measurement sum type
// ────────────────────────────────────────────────────────────────────────────

/// Sensor stream discriminant.
///
/// The declaration order is the tie-break precedence used when two
/// measurements share a timestamp: lower variants replay first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SensorType {
    PointCloud,
    Imu,
    Odometry,
    GroundTruth,
}

impl SensorType {
    /// Upper-case display name used in logs and replay summaries.
    pub fn name(self) -> &'static str {
        match self {
            SensorType::PointCloud => "POINTCLOUD",
            SensorType::Imu => "IMU",
            SensorType::Odometry => "ODOM",
            SensorType::GroundTruth => "GT",
        }
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Any measurement the front end consumes.
///
/// Serialised with an internal `kind` tag so replay logs stay one JSON object
/// per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    PointCloud(PointCloud),
    Imu(ImuSample),
    Odometry(OdometrySample),
    PoseStamped(PoseStampedSample),
}

impl Measurement {
    /// Stream this measurement belongs to. Pose-stamped samples replay on the
    /// ground-truth stream.
    pub fn sensor_type(&self) -> SensorType {
        match self {
            Measurement::PointCloud(_) => SensorType::PointCloud,
            Measurement::Imu(_) => SensorType::Imu,
            Measurement::Odometry(_) => SensorType::Odometry,
            Measurement::PoseStamped(_) => SensorType::GroundTruth,
        }
    }
}

impl Stamped for Measurement {
    fn stamp(&self) -> f64 {
        match self {
            Measurement::PointCloud(m) => m.stamp(),
            Measurement::Imu(m) => m.stamp(),
            Measurement::Odometry(m) => m.stamp(),
            Measurement::PoseStamped(m) => m.stamp(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Outputs
// ────────────────────────────────────────────────────────────────────────────

/// A stamped rigid transform published by the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub stamp: f64,
    pub frame_id: String,
    pub pose: Isometry3<f64>,
}

/// Per-stage wall-clock durations of one scan callback (seconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub lidar_callback: f64,
    pub registration: f64,
}

/// Running counters of every non-fatal condition the pipeline absorbed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendDiagnostics {
    pub scans_processed: u64,
    pub dropped_scans: u64,
    pub imu_unavailable: u64,
    pub odometry_unavailable: u64,
    pub pose_stamped_unavailable: u64,
    pub malformed_samples: u64,
    pub duplicate_samples: u64,
    pub imu_frame_mismatches: u64,
    pub registration_failures: u64,
    pub threshold_rejections: u64,
    pub keyframes_added: u64,
    pub map_refreshes: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// Bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the in-process bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Wall-clock time the event was created (not the sensor stamp).
    pub timestamp: DateTime<Utc>,
    /// e.g., "strider-runtime::frontend"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Measurement(Measurement),
    /// Toggles yaw-only attitude integration.
    FlatGroundAssumption(bool),
    IncrementalPose(PoseEstimate),
    IntegratedPose(PoseEstimate),
    /// Filtered scan in the base frame, as handed to the mapping back end.
    BaseFrameCloud(PointCloud),
    Diagnostics(FrontendDiagnostics),
    ComputationTime(StageTimings),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-level error. Only fatal or I/O-bound conditions surface here;
/// per-scan failures are absorbed by the pipeline.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum StriderError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Point cloud file {path}: {details}")]
    PointCloudFile { path: String, details: String },

    #[error("Replay log line {line}: {details}")]
    ReplayLog { line: usize, details: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StriderError {
    fn from(e: std::io::Error) -> Self {
        StriderError::Io(e.to_string())
    }
}
