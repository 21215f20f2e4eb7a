//! Data-integration mode selection.
//!
//! Decides, for every scan, which auxiliary source supplies the rotation
//! hypothesis that seeds registration. Sources are ranked
//!
//! ```text
//! IMU  >  ODOMETRY  >  POSE_STAMPED  >  NONE
//! ```
//!
//! and re-evaluated on every scan without hysteresis: an IMU dropout demotes
//! to the next available source immediately and IMU is promoted back as soon
//! as a usable sample is near the scan stamp again.
//!
//! A source is *usable* at a scan stamp when it is enabled and its buffer
//! holds a sample within `max_time_difference` of the stamp. Samples with NaN
//! components or a degenerate orientation never reach the buffer. The IMU
//! additionally needs its frame to have passed the one-time
//! [`ImuFrameCheck`].
//!
//! Each [`SourceChannel`] owns its buffer and a [`SourceState`]. The first
//! sample received after the anchor was cleared seeds `previous_sample`; at
//! each scan the hypothesis is the delta from that anchor to the sample
//! nearest the scan, after which the anchor moves to that sample.

use nalgebra::{Quaternion, UnitQuaternion};
use serde::{Deserialize, Serialize};
use strider_types::{ImuSample, OdometrySample, PoseStampedSample, Stamped};
use thiserror::Error;
use tracing::{debug, warn};

use crate::attitude::{AttitudeError, AttitudeMode, relative_rotation, to_body_frame, unit_orientation};
use crate::buffer::{BufferError, TimeIndexedBuffer};

// ────────────────────────────────────────────────────────────────────────────
// Mode
// ────────────────────────────────────────────────────────────────────────────

/// Source of the rotation hypothesis for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMode {
    None,
    Imu,
    Odometry,
    PoseStamped,
}

impl IntegrationMode {
    pub fn name(self) -> &'static str {
        match self {
            IntegrationMode::None => "NONE",
            IntegrationMode::Imu => "IMU",
            IntegrationMode::Odometry => "ODOMETRY",
            IntegrationMode::PoseStamped => "POSE_STAMPED",
        }
    }
}

impl std::fmt::Display for IntegrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sources
// ────────────────────────────────────────────────────────────────────────────

/// A stamped sample carrying an orientation usable for attitude deltas.
pub trait AttitudeSource: Stamped + Clone {
    fn orientation(&self) -> &Quaternion<f64>;

    fn frame_id(&self) -> &str;

    /// True when any component the front end consumes is NaN.
    fn has_nan(&self) -> bool;
}

impl AttitudeSource for ImuSample {
    fn orientation(&self) -> &Quaternion<f64> {
        &self.orientation
    }

    fn frame_id(&self) -> &str {
        &self.header.frame_id
    }

    fn has_nan(&self) -> bool {
        self.orientation.coords.iter().any(|v| v.is_nan())
    }
}

impl AttitudeSource for OdometrySample {
    fn orientation(&self) -> &Quaternion<f64> {
        &self.pose.orientation
    }

    fn frame_id(&self) -> &str {
        &self.header.frame_id
    }

    fn has_nan(&self) -> bool {
        self.pose.has_nan()
    }
}

impl AttitudeSource for PoseStampedSample {
    fn orientation(&self) -> &Quaternion<f64> {
        &self.pose.orientation
    }

    fn frame_id(&self) -> &str {
        &self.header.frame_id
    }

    fn has_nan(&self) -> bool {
        self.pose.has_nan()
    }
}

/// Why a source could not contribute at a scan stamp.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SourceUnavailable {
    #[error("source disabled")]
    Disabled,

    #[error("no sample near the requested stamp")]
    NoSample,

    #[error("malformed sample: {0}")]
    Malformed(AttitudeError),
}

/// Why a received sample was not buffered.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ReceiveError {
    #[error("malformed sample discarded: {0}")]
    Malformed(AttitudeError),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Per-source bookkeeping.
#[derive(Debug, Clone)]
pub struct SourceState<T> {
    pub has_been_received: bool,
    /// Anchor for the next delta.
    pub previous_sample: Option<T>,
    pub call_count: u64,
    /// Whether the source was usable at the last scan.
    pub consecutive_available: bool,
}

impl<T> Default for SourceState<T> {
    fn default() -> Self {
        Self {
            has_been_received: false,
            previous_sample: None,
            call_count: 0,
            consecutive_available: false,
        }
    }
}

/// Orientation of a source at a scan plus the anchor it is measured from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceReading {
    pub current: UnitQuaternion<f64>,
    /// `None` right after (re)seeding: no delta this scan.
    pub previous: Option<UnitQuaternion<f64>>,
}

/// Buffer and state of one auxiliary source.
#[derive(Debug, Clone)]
pub struct SourceChannel<T> {
    buffer: TimeIndexedBuffer<T>,
    state: SourceState<T>,
    /// Sensor-to-body rotation applied to every orientation.
    to_body: Option<UnitQuaternion<f64>>,
}

impl<T: AttitudeSource> SourceChannel<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: TimeIndexedBuffer::new(capacity),
            state: SourceState::default(),
            to_body: None,
        }
    }

    pub fn set_body_rotation(&mut self, to_body: Option<UnitQuaternion<f64>>) {
        self.to_body = to_body;
    }

    /// Record one received sample: count it, discard it when malformed,
    /// otherwise buffer it and seed the anchor when none is held.
    pub fn receive(&mut self, sample: T) -> Result<(), ReceiveError> {
        self.state.call_count += 1;
        self.state.has_been_received = true;

        self.orient(&sample).map_err(ReceiveError::Malformed)?;
        let seed = self.state.previous_sample.is_none().then(|| sample.clone());
        self.buffer.insert(sample)?;
        if let Some(seed) = seed {
            debug!(stamp = seed.stamp(), "source anchor seeded");
            self.state.previous_sample = Some(seed);
        }
        Ok(())
    }

    /// Validated orientation of `sample` in the body frame.
    pub fn orient(&self, sample: &T) -> Result<UnitQuaternion<f64>, AttitudeError> {
        if sample.has_nan() {
            return Err(AttitudeError::NaN);
        }
        let q = unit_orientation(sample.orientation())?;
        Ok(match &self.to_body {
            Some(to_body) => to_body_frame(to_body, &q),
            None => q,
        })
    }

    /// Orientation near `stamp` without touching the anchor.
    pub fn attitude_at(&self, stamp: f64, tolerance: f64) -> Result<UnitQuaternion<f64>, SourceUnavailable> {
        let sample = self
            .buffer
            .lookup(stamp, tolerance)
            .ok_or(SourceUnavailable::NoSample)?;
        self.orient(sample).map_err(SourceUnavailable::Malformed)
    }

    /// Read the source at a scan stamp and move the anchor to that sample.
    ///
    /// On failure the anchor is cleared so the next received sample reseeds
    /// it.
    pub fn advance(&mut self, stamp: f64, tolerance: f64) -> Result<SourceReading, SourceUnavailable> {
        let Some(sample) = self.buffer.lookup(stamp, tolerance).cloned() else {
            self.invalidate();
            return Err(SourceUnavailable::NoSample);
        };
        let current = match self.orient(&sample) {
            Ok(q) => q,
            Err(e) => {
                self.invalidate();
                return Err(SourceUnavailable::Malformed(e));
            }
        };
        let previous = self
            .state
            .previous_sample
            .as_ref()
            .and_then(|anchor| self.orient(anchor).ok());
        self.state.previous_sample = Some(sample);
        self.state.consecutive_available = true;
        Ok(SourceReading { current, previous })
    }

    /// Drop the anchor after the source was unusable at a scan.
    pub fn invalidate(&mut self) {
        self.state.previous_sample = None;
        self.state.consecutive_available = false;
    }

    pub fn state(&self) -> &SourceState<T> {
        &self.state
    }

    pub fn buffer(&self) -> &TimeIndexedBuffer<T> {
        &self.buffer
    }
}

/// The three auxiliary sources, owned together.
#[derive(Debug, Clone)]
pub struct SourceChannels {
    pub imu: SourceChannel<ImuSample>,
    pub odometry: SourceChannel<OdometrySample>,
    pub pose_stamped: SourceChannel<PoseStampedSample>,
}

impl SourceChannels {
    pub fn new(imu_capacity: usize, odometry_capacity: usize, pose_stamped_capacity: usize) -> Self {
        Self {
            imu: SourceChannel::new(imu_capacity),
            odometry: SourceChannel::new(odometry_capacity),
            pose_stamped: SourceChannel::new(pose_stamped_capacity),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// IMU frame check
// ────────────────────────────────────────────────────────────────────────────

/// What to do when the first IMU sample is not in the expected frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMismatchPolicy {
    /// Adopt the observed frame and drop the configured extrinsic.
    #[default]
    CorrectExtrinsic,
    /// Stop using the IMU for the rest of the run.
    DisableImu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheck {
    /// First sample matched the expected frame.
    Verified,
    /// First sample mismatched; the extrinsic was corrected once.
    Corrected,
    /// IMU integration is disabled for the run.
    Disabled,
    /// A later sample matched the verified frame.
    Consistent,
    /// A later sample disagreed with the verified frame.
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStatus {
    Unchecked,
    Verified,
    Disabled,
}

/// One-time consistency check of the IMU frame id.
///
/// Samples without a frame id are accepted as consistent.
#[derive(Debug, Clone)]
pub struct ImuFrameCheck {
    expected: String,
    policy: FrameMismatchPolicy,
    status: FrameStatus,
}

impl ImuFrameCheck {
    pub fn new(expected: impl Into<String>, policy: FrameMismatchPolicy) -> Self {
        Self {
            expected: expected.into(),
            policy,
            status: FrameStatus::Unchecked,
        }
    }

    pub fn observe(&mut self, frame_id: &str) -> FrameCheck {
        let matches = frame_id.is_empty() || frame_id == self.expected;
        match self.status {
            FrameStatus::Disabled => FrameCheck::Disabled,
            FrameStatus::Verified if matches => FrameCheck::Consistent,
            FrameStatus::Verified => FrameCheck::Mismatch,
            FrameStatus::Unchecked if matches => {
                self.status = FrameStatus::Verified;
                FrameCheck::Verified
            }
            FrameStatus::Unchecked => match self.policy {
                FrameMismatchPolicy::CorrectExtrinsic => {
                    warn!(expected = %self.expected, observed = frame_id, "imu frame mismatch, adopting observed frame");
                    self.expected = frame_id.to_string();
                    self.status = FrameStatus::Verified;
                    FrameCheck::Corrected
                }
                FrameMismatchPolicy::DisableImu => {
                    warn!(expected = %self.expected, observed = frame_id, "imu frame mismatch, disabling imu integration");
                    self.status = FrameStatus::Disabled;
                    FrameCheck::Disabled
                }
            },
        }
    }

    pub fn is_verified(&self) -> bool {
        self.status == FrameStatus::Verified
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Selector
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorSettings {
    pub use_imu: bool,
    /// Keep only the yaw part of IMU deltas.
    pub use_imu_yaw: bool,
    pub use_odometry: bool,
    pub use_pose_stamped: bool,
    /// Seconds between a scan and the nearest usable sample.
    pub max_time_difference: f64,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            use_imu: true,
            use_imu_yaw: false,
            use_odometry: true,
            use_pose_stamped: true,
            max_time_difference: 0.1,
        }
    }
}

/// Readings gathered from every source at one scan stamp.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    pub imu: Option<SourceReading>,
    pub odometry: Option<SourceReading>,
    pub pose_stamped: Option<SourceReading>,
}

/// Selected mode and the rotation it yields; `rotation` is `None` when the
/// registration guess should be the identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hypothesis {
    pub mode: IntegrationMode,
    pub rotation: Option<UnitQuaternion<f64>>,
}

#[derive(Debug, Clone)]
pub struct ModeSelector {
    settings: SelectorSettings,
    frame_check: ImuFrameCheck,
    flat_ground: bool,
}

impl ModeSelector {
    pub fn new(settings: SelectorSettings, frame_check: ImuFrameCheck) -> Self {
        Self {
            settings,
            frame_check,
            flat_ground: false,
        }
    }

    pub fn settings(&self) -> &SelectorSettings {
        &self.settings
    }

    /// Run the IMU frame check for a newly received sample.
    pub fn observe_imu_frame(&mut self, frame_id: &str) -> FrameCheck {
        self.frame_check.observe(frame_id)
    }

    /// Toggle the flat-ground assumption; returns the previous value.
    pub fn set_flat_ground(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.flat_ground, enabled)
    }

    pub fn flat_ground(&self) -> bool {
        self.flat_ground
    }

    /// Whether `source` may be consulted at all.
    pub fn enabled(&self, source: IntegrationMode) -> bool {
        match source {
            IntegrationMode::Imu => self.settings.use_imu && self.frame_check.is_verified(),
            IntegrationMode::Odometry => self.settings.use_odometry,
            IntegrationMode::PoseStamped => self.settings.use_pose_stamped,
            IntegrationMode::None => true,
        }
    }

    /// Delta projection for `mode`. The flat-ground assumption forces
    /// yaw-only for every source.
    pub fn attitude_mode(&self, mode: IntegrationMode) -> AttitudeMode {
        if self.flat_ground || (mode == IntegrationMode::Imu && self.settings.use_imu_yaw) {
            AttitudeMode::YawOnly
        } else {
            AttitudeMode::Full
        }
    }

    /// Highest-priority usable source.
    pub fn choose(&self, imu: bool, odometry: bool, pose_stamped: bool) -> IntegrationMode {
        if imu && self.enabled(IntegrationMode::Imu) {
            IntegrationMode::Imu
        } else if odometry && self.enabled(IntegrationMode::Odometry) {
            IntegrationMode::Odometry
        } else if pose_stamped && self.enabled(IntegrationMode::PoseStamped) {
            IntegrationMode::PoseStamped
        } else {
            IntegrationMode::None
        }
    }

    /// Mode for a scan at `stamp`, without side effects.
    pub fn select_mode(&self, stamp: f64, sources: &SourceChannels) -> IntegrationMode {
        let tolerance = self.settings.max_time_difference;
        self.choose(
            sources.imu.attitude_at(stamp, tolerance).is_ok(),
            sources.odometry.attitude_at(stamp, tolerance).is_ok(),
            sources.pose_stamped.attitude_at(stamp, tolerance).is_ok(),
        )
    }

    /// Read `channel` at a scan stamp if `source` is enabled, moving its
    /// anchor. Disabled or unusable sources lose their anchor.
    pub fn advance<T: AttitudeSource>(
        &self,
        source: IntegrationMode,
        channel: &mut SourceChannel<T>,
        stamp: f64,
    ) -> Result<SourceReading, SourceUnavailable> {
        if !self.enabled(source) {
            channel.invalidate();
            return Err(SourceUnavailable::Disabled);
        }
        channel.advance(stamp, self.settings.max_time_difference)
    }

    /// Pick the mode from gathered readings and derive its rotation.
    pub fn resolve(&self, readings: &Readings) -> Hypothesis {
        let mode = self.choose(
            readings.imu.is_some(),
            readings.odometry.is_some(),
            readings.pose_stamped.is_some(),
        );
        let reading = match mode {
            IntegrationMode::Imu => readings.imu,
            IntegrationMode::Odometry => readings.odometry,
            IntegrationMode::PoseStamped => readings.pose_stamped,
            IntegrationMode::None => None,
        };
        let attitude_mode = self.attitude_mode(mode);
        let rotation = reading.and_then(|r| {
            r.previous
                .map(|previous| relative_rotation(&previous, &r.current, attitude_mode))
        });
        Hypothesis { mode, rotation }
    }

    /// Select the mode for a scan at `stamp` and compute its rotation
    /// hypothesis, moving every source's anchor to the scan.
    pub fn rotation_hypothesis(&self, stamp: f64, sources: &mut SourceChannels) -> Hypothesis {
        let readings = Readings {
            imu: self.advance(IntegrationMode::Imu, &mut sources.imu, stamp).ok(),
            odometry: self.advance(IntegrationMode::Odometry, &mut sources.odometry, stamp).ok(),
            pose_stamped: self
                .advance(IntegrationMode::PoseStamped, &mut sources.pose_stamped, stamp)
                .ok(),
        };
        self.resolve(&readings)
    }
}
