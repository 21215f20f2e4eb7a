//! [`Frontend`] – the LiDAR-inertial odometry front end.
//!
//! Owns every piece of per-run state and exposes one callback per input:
//!
//! | Callback | Effect |
//! |---|---|
//! | [`on_imu`][Frontend::on_imu] | IMU frame check, then buffer the sample |
//! | [`on_odometry`][Frontend::on_odometry] | buffer the sample |
//! | [`on_pose_stamped`][Frontend::on_pose_stamped] | buffer the sample |
//! | [`on_flat_ground`][Frontend::on_flat_ground] | toggle yaw-only integration |
//! | [`on_point_cloud`][Frontend::on_point_cloud] | run the scan pipeline, return a [`ScanOutput`] |
//!
//! # Scan pipeline
//!
//! 1. Detect sequence gaps and classify the scan as open space.
//! 2. Filter the scan.
//! 3. Read every enabled source at the scan stamp and pick the rotation
//!    hypothesis ([`ModeSelector::resolve`]).
//! 4. Register ([`PointCloudOdometry::update_estimate`]).
//! 5. Offer the scan to the keyframe map and update the sliding window.
//!
//! # Locking
//!
//! Each source channel sits behind its own `RwLock`, so auxiliary callbacks
//! of different types never contend. The scan pipeline is behind a `Mutex`:
//! at most one scan is in flight. Lock order inside a scan is pipeline,
//! selector, then one channel at a time.
//!
//! No callback returns an error. Everything that goes wrong after
//! construction is absorbed, logged and counted in [`FrontendDiagnostics`].

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use nalgebra::{Isometry3, Point3};
use strider_perception::buffer::BufferError;
use strider_perception::filter::PointCloudFilter;
use strider_perception::icp::PointToPointIcp;
use strider_perception::integration::{
    AttitudeSource, FrameCheck, ImuFrameCheck, IntegrationMode, ModeSelector, Readings, ReceiveError,
    SourceChannel, SourceReading, SourceUnavailable,
};
use strider_perception::local_map::{LocalMap, SlidingWindow};
use strider_perception::registration::{
    PointCloudOdometry, PointSetRegistration, ReferenceMode, RegistrationState,
};
use strider_types::{
    FrontendDiagnostics, Header, ImuSample, Measurement, OdometrySample, PointCloud, PoseEstimate,
    PoseStampedSample, StageTimings, Stamped, StriderError,
};
use tracing::{debug, info, instrument, warn};

use crate::config::FrontendConfig;
use crate::pcd::read_pcd;

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one scan produced.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub stamp: f64,
    pub mode: IntegrationMode,
    pub state: RegistrationState,
    /// Previous scan frame to current scan frame, in the base frame.
    pub incremental: PoseEstimate,
    /// Fixed frame to current scan frame.
    pub integrated: PoseEstimate,
    /// Filtered scan, re-stamped in the base frame.
    pub base_cloud: PointCloud,
    /// Filtered scan as moved by registration.
    pub aligned: Vec<Point3<f64>>,
    pub fitness: f64,
    pub initial_guess: Isometry3<f64>,
    pub keyframe_added: Option<u64>,
    pub map_refreshed: bool,
    pub open_space: bool,
    /// Present when computation-time profiling is enabled.
    pub timings: Option<StageTimings>,
    pub diagnostics: FrontendDiagnostics,
}

// ─────────────────────────────────────────────────────────────────────────────
// Frontend
// ─────────────────────────────────────────────────────────────────────────────

/// State touched only by the scan callback.
struct ScanPipeline<R> {
    odometry: PointCloudOdometry<R>,
    map: LocalMap,
    window: SlidingWindow,
    last_seq: Option<u64>,
    /// The map changed since it was last handed to registration.
    map_dirty: bool,
}

impl<R> ScanPipeline<R> {
    /// Number of scans missing between the previous sequence number and
    /// `seq`. A sequence that goes backwards restarts tracking.
    fn track_sequence(&mut self, seq: u64) -> u64 {
        let missing = match self.last_seq {
            Some(last) if seq > last => seq - last - 1,
            _ => 0,
        };
        self.last_seq = Some(seq);
        missing
    }
}

pub struct Frontend<R = PointToPointIcp> {
    config: FrontendConfig,
    imu: RwLock<SourceChannel<ImuSample>>,
    odometry: RwLock<SourceChannel<OdometrySample>>,
    pose_stamped: RwLock<SourceChannel<PoseStampedSample>>,
    selector: RwLock<ModeSelector>,
    diagnostics: Mutex<FrontendDiagnostics>,
    pipeline: Mutex<ScanPipeline<R>>,
    filter: Box<dyn PointCloudFilter>,
}

impl Frontend<PointToPointIcp> {
    /// Build a front end registering with point-to-point ICP and the
    /// configured filter.
    pub fn new(config: FrontendConfig) -> Result<Self, StriderError> {
        let registration = PointToPointIcp::new(config.icp);
        let filter = config.filter.build();
        Self::with_parts(config, registration, filter)
    }
}

impl<R: PointSetRegistration> Frontend<R> {
    /// Build a front end around a custom registration capability and filter.
    ///
    /// Fails with [`StriderError::Initialization`] on an invalid
    /// configuration or an unreadable ground-truth cloud.
    pub fn with_parts(
        config: FrontendConfig,
        registration: R,
        filter: Box<dyn PointCloudFilter>,
    ) -> Result<Self, StriderError> {
        config
            .validate()
            .map_err(|e| StriderError::Initialization(e.to_string()))?;
        let imu_to_base = config
            .integration
            .imu_to_base()
            .map_err(|e| StriderError::Initialization(e.to_string()))?;

        let mut map = LocalMap::new(config.keyframes);
        let mut map_dirty = false;
        if let Some(path) = &config.ground_truth.point_cloud_filename {
            let points = read_pcd(path).map_err(|e| StriderError::Initialization(e.to_string()))?;
            info!(path = %path.display(), points = points.len(), "local map seeded from ground-truth cloud");
            map.seed(points);
            map_dirty = true;
        }

        let mut imu = SourceChannel::new(config.buffers.imu_buffer_size_limit);
        if config.integration.convert_imu_to_base_frame {
            imu.set_body_rotation(Some(imu_to_base));
        }
        let selector = ModeSelector::new(
            config.selector_settings(),
            ImuFrameCheck::new(
                config.expected_imu_frame(),
                config.integration.imu_frame_mismatch_policy,
            ),
        );
        let pipeline = ScanPipeline {
            odometry: PointCloudOdometry::new(registration, config.odometry_settings()),
            map,
            window: SlidingWindow::new(config.sliding_window),
            last_seq: None,
            map_dirty,
        };

        Ok(Self {
            imu: RwLock::new(imu),
            odometry: RwLock::new(SourceChannel::new(config.buffers.odometry_buffer_size_limit)),
            pose_stamped: RwLock::new(SourceChannel::new(
                config.buffers.pose_stamped_buffer_size_limit,
            )),
            selector: RwLock::new(selector),
            diagnostics: Mutex::new(FrontendDiagnostics::default()),
            pipeline: Mutex::new(pipeline),
            filter,
            config,
        })
    }

    pub fn config(&self) -> &FrontendConfig {
        &self.config
    }

    /// Snapshot of the running counters.
    pub fn diagnostics(&self) -> FrontendDiagnostics {
        lock(&self.diagnostics).clone()
    }

    pub fn flat_ground(&self) -> bool {
        read(&self.selector).flat_ground()
    }

    /// Current integrated pose.
    pub fn integrated_estimate(&self) -> Isometry3<f64> {
        *lock(&self.pipeline).odometry.integrated_estimate()
    }

    pub fn keyframe_count(&self) -> usize {
        lock(&self.pipeline).map.len()
    }

    // ── Auxiliary callbacks ──────────────────────────────────────────────────

    pub fn on_imu(&self, sample: ImuSample) {
        let check = write(&self.selector).observe_imu_frame(&sample.header.frame_id);
        match check {
            FrameCheck::Corrected => {
                // The samples already arrive in the observed frame.
                write(&self.imu).set_body_rotation(None);
            }
            FrameCheck::Mismatch => {
                lock(&self.diagnostics).imu_frame_mismatches += 1;
                warn!(frame_id = %sample.header.frame_id, stamp = sample.stamp(), "imu frame differs from the verified frame");
            }
            FrameCheck::Verified | FrameCheck::Consistent | FrameCheck::Disabled => {}
        }
        self.receive(&self.imu, sample, IntegrationMode::Imu);
    }

    pub fn on_odometry(&self, sample: OdometrySample) {
        self.receive(&self.odometry, sample, IntegrationMode::Odometry);
    }

    pub fn on_pose_stamped(&self, sample: PoseStampedSample) {
        self.receive(&self.pose_stamped, sample, IntegrationMode::PoseStamped);
    }

    pub fn on_flat_ground(&self, enabled: bool) {
        let previous = write(&self.selector).set_flat_ground(enabled);
        if previous != enabled {
            info!(enabled, "flat ground assumption toggled");
        }
    }

    /// Route any measurement to its callback. Only scans produce output.
    pub fn handle(&self, measurement: Measurement) -> Option<ScanOutput> {
        match measurement {
            Measurement::PointCloud(cloud) => Some(self.on_point_cloud(&cloud)),
            Measurement::Imu(sample) => {
                self.on_imu(sample);
                None
            }
            Measurement::Odometry(sample) => {
                self.on_odometry(sample);
                None
            }
            Measurement::PoseStamped(sample) => {
                self.on_pose_stamped(sample);
                None
            }
        }
    }

    fn receive<T: AttitudeSource>(&self, channel: &RwLock<SourceChannel<T>>, sample: T, source: IntegrationMode) {
        let stamp = sample.stamp();
        let result = write(channel).receive(sample);

        let mut diagnostics = lock(&self.diagnostics);
        match result {
            Ok(()) => {}
            Err(ReceiveError::Malformed(reason)) => {
                diagnostics.malformed_samples += 1;
                debug!(source = %source, stamp, %reason, "malformed sample discarded");
            }
            Err(ReceiveError::Buffer(BufferError::DuplicateStamp(_))) => {
                diagnostics.duplicate_samples += 1;
                debug!(source = %source, stamp, "duplicate timestamp, sample ignored");
            }
            Err(ReceiveError::Buffer(BufferError::NonFiniteStamp(_))) => {
                diagnostics.malformed_samples += 1;
                warn!(source = %source, stamp, "sample with non-finite timestamp dropped");
            }
        }
    }

    // ── Scan callback ────────────────────────────────────────────────────────

    /// Process one scan end to end.
    #[instrument(name = "lidar_callback", skip_all, fields(stamp = cloud.header.stamp, seq = cloud.header.seq, points = cloud.len()))]
    pub fn on_point_cloud(&self, cloud: &PointCloud) -> ScanOutput {
        let started = Instant::now();
        let stamp = cloud.header.stamp;
        let mut pipeline = lock(&self.pipeline);

        let missing = pipeline.track_sequence(cloud.header.seq);
        if missing > 0 {
            warn!(missing, seq = cloud.header.seq, "scan sequence gap");
            lock(&self.diagnostics).dropped_scans += missing;
        }

        let open_space = cloud.len() > self.config.open_space.number_of_points_open_space;
        let filtered = self.filter.filter(cloud, open_space);

        let hypothesis = {
            let selector = read(&self.selector);
            let readings = Readings {
                imu: self.consult(&selector, IntegrationMode::Imu, &self.imu, stamp),
                odometry: self.consult(&selector, IntegrationMode::Odometry, &self.odometry, stamp),
                pose_stamped: self.consult(&selector, IntegrationMode::PoseStamped, &self.pose_stamped, stamp),
            };
            selector.resolve(&readings)
        };
        debug!(mode = %hypothesis.mode, rotation = hypothesis.rotation.map(|r| r.angle()), "rotation hypothesis");

        let ScanPipeline {
            odometry,
            map,
            window,
            map_dirty,
            ..
        } = &mut *pipeline;

        odometry.set_rotation_hypothesis(hypothesis.rotation);
        if odometry.settings().reference == ReferenceMode::LocalMap && *map_dirty {
            odometry.set_map_reference(map.world_points());
            *map_dirty = false;
        }
        odometry.set_scan(filtered.points.clone(), stamp);
        let registration_started = Instant::now();
        let state = odometry.update_estimate();
        let registration_time = registration_started.elapsed().as_secs_f64();
        let integrated = *odometry.integrated_estimate();

        let keyframe_added = map.consider(stamp, &integrated, &filtered.points);
        let map_refreshed = window.update(stamp, &integrated);
        let mut removed = 0;
        if map_refreshed {
            let settings = window.settings();
            removed = map.trim_to_window(&integrated, settings.box_filter_size, settings.max_keyframes);
            debug!(removed, keyframes = map.len(), "map window trimmed");
        }
        if keyframe_added.is_some() || removed > 0 {
            *map_dirty = true;
        }

        let diagnostics = {
            let mut diagnostics = lock(&self.diagnostics);
            diagnostics.scans_processed += 1;
            match state {
                RegistrationState::FailedConvergence => diagnostics.registration_failures += 1,
                RegistrationState::RejectedThreshold => diagnostics.threshold_rejections += 1,
                _ => {}
            }
            if keyframe_added.is_some() {
                diagnostics.keyframes_added += 1;
            }
            if map_refreshed {
                diagnostics.map_refreshes += 1;
            }
            diagnostics.clone()
        };

        let frames = &self.config.frames;
        let timings = self.config.profiling.enable_computation_time_profiling.then(|| StageTimings {
            lidar_callback: started.elapsed().as_secs_f64(),
            registration: registration_time,
        });

        ScanOutput {
            stamp,
            mode: hypothesis.mode,
            state,
            incremental: PoseEstimate {
                stamp,
                frame_id: frames.base_frame_id.clone(),
                pose: *odometry.incremental_estimate(),
            },
            integrated: PoseEstimate {
                stamp,
                frame_id: frames.fixed_frame_id.clone(),
                pose: integrated,
            },
            base_cloud: PointCloud::new(
                Header::new(cloud.header.seq, stamp, frames.base_frame_id.clone()),
                filtered.points,
            ),
            aligned: odometry.aligned_points().to_vec(),
            fitness: odometry.fitness_score(),
            initial_guess: *odometry.initial_guess(),
            keyframe_added,
            map_refreshed,
            open_space,
            timings,
            diagnostics,
        }
    }

    /// Read one source for the scan at `stamp`, counting unavailability of
    /// enabled sources.
    fn consult<T: AttitudeSource>(
        &self,
        selector: &ModeSelector,
        source: IntegrationMode,
        channel: &RwLock<SourceChannel<T>>,
        stamp: f64,
    ) -> Option<SourceReading> {
        let mut channel = write(channel);
        match selector.advance(source, &mut channel, stamp) {
            Ok(reading) => Some(reading),
            Err(SourceUnavailable::Disabled) => None,
            Err(reason) => {
                let mut diagnostics = lock(&self.diagnostics);
                match source {
                    IntegrationMode::Imu => diagnostics.imu_unavailable += 1,
                    IntegrationMode::Odometry => diagnostics.odometry_unavailable += 1,
                    IntegrationMode::PoseStamped => diagnostics.pose_stamped_unavailable += 1,
                    IntegrationMode::None => {}
                }
                debug!(source = %source, stamp, %reason, "source unavailable");
                None
            }
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
