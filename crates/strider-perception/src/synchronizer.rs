//! Chronological replay order across heterogeneous sensor queues.
//!
//! The synchronizer holds one pending queue per [`SensorType`]. After
//! [`sort_messages`][MeasurementSynchronizer::sort_messages] it hands out
//! `(type, index)` pairs in ascending timestamp order, same-stamp entries
//! ordered by the [`SensorType`] declaration order. It never mutates or
//! drops a message; callers fetch the payload from the matching queue.
//!
//! # Example
//!
//! ```rust
//! use nalgebra::Quaternion;
//! use strider_perception::synchronizer::MeasurementSynchronizer;
//! use strider_types::{Header, ImuSample, PointCloud, SensorType};
//!
//! let mut sync = MeasurementSynchronizer::new();
//! let imu = ImuSample { header: Header::new(0, 0.2, "imu"), orientation: Quaternion::identity() };
//! sync.add_imu(imu, None);
//! sync.add_point_cloud(PointCloud::new(Header::new(0, 0.1, "lidar"), vec![]), None);
//! sync.sort_messages();
//!
//! assert_eq!(sync.next_message(), Some((SensorType::PointCloud, 0)));
//! assert_eq!(sync.next_message(), Some((SensorType::Imu, 0)));
//! assert!(!sync.next_message_exists());
//! ```

use strider_types::{
    ImuSample, Measurement, OdometrySample, PointCloud, PoseStampedSample, SensorType, Stamped,
};

/// A queued message with an optional free-form tag (e.g. the topic it was
/// recorded from).
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub msg: T,
    pub tag: Option<String>,
}

/// Sort key for one pending message.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimestampedType {
    time: f64,
    sensor_type: SensorType,
    index: usize,
}

#[derive(Debug, Default)]
pub struct MeasurementSynchronizer {
    point_clouds: Vec<Tagged<PointCloud>>,
    imu: Vec<Tagged<ImuSample>>,
    odometry: Vec<Tagged<OdometrySample>>,
    ground_truth: Vec<Tagged<PoseStampedSample>>,
    ordering: Vec<TimestampedType>,
    pending_index: usize,
}

impl MeasurementSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point_cloud(&mut self, msg: PointCloud, tag: Option<String>) {
        self.point_clouds.push(Tagged { msg, tag });
    }

    pub fn add_imu(&mut self, msg: ImuSample, tag: Option<String>) {
        self.imu.push(Tagged { msg, tag });
    }

    pub fn add_odometry(&mut self, msg: OdometrySample, tag: Option<String>) {
        self.odometry.push(Tagged { msg, tag });
    }

    pub fn add_ground_truth(&mut self, msg: PoseStampedSample, tag: Option<String>) {
        self.ground_truth.push(Tagged { msg, tag });
    }

    /// Queue any measurement on the queue of its [`SensorType`].
    pub fn add(&mut self, measurement: Measurement, tag: Option<String>) {
        match measurement {
            Measurement::PointCloud(m) => self.add_point_cloud(m, tag),
            Measurement::Imu(m) => self.add_imu(m, tag),
            Measurement::Odometry(m) => self.add_odometry(m, tag),
            Measurement::PoseStamped(m) => self.add_ground_truth(m, tag),
        }
    }

    /// Build the replay order over everything queued so far and rewind the
    /// cursor.
    pub fn sort_messages(&mut self) {
        fn keys<T: Stamped>(queue: &[Tagged<T>], sensor_type: SensorType) -> impl Iterator<Item = TimestampedType> + '_ {
            queue.iter().enumerate().map(move |(index, m)| TimestampedType {
                time: m.msg.stamp(),
                sensor_type,
                index,
            })
        }

        let mut ordering: Vec<TimestampedType> = keys(&self.point_clouds, SensorType::PointCloud)
            .chain(keys(&self.imu, SensorType::Imu))
            .chain(keys(&self.odometry, SensorType::Odometry))
            .chain(keys(&self.ground_truth, SensorType::GroundTruth))
            .collect();
        // Stable, so equal (time, type) keep their queue order.
        ordering.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then_with(|| a.sensor_type.cmp(&b.sensor_type))
        });
        self.ordering = ordering;
        self.pending_index = 0;
    }

    /// Next `(type, index)` in replay order, advancing the cursor.
    pub fn next_message(&mut self) -> Option<(SensorType, usize)> {
        let next = self.ordering.get(self.pending_index)?;
        self.pending_index += 1;
        Some((next.sensor_type, next.index))
    }

    /// Whether [`next_message`][Self::next_message] would return an entry.
    pub fn next_message_exists(&self) -> bool {
        self.pending_index < self.ordering.len()
    }

    /// Fetch a queued message as a [`Measurement`] together with its tag.
    pub fn measurement(&self, sensor_type: SensorType, index: usize) -> Option<(Measurement, Option<&str>)> {
        fn pick<T: Clone>(
            queue: &[Tagged<T>],
            index: usize,
            wrap: fn(T) -> Measurement,
        ) -> Option<(Measurement, Option<&str>)> {
            queue
                .get(index)
                .map(|m| (wrap(m.msg.clone()), m.tag.as_deref()))
        }

        match sensor_type {
            SensorType::PointCloud => pick(&self.point_clouds, index, Measurement::PointCloud),
            SensorType::Imu => pick(&self.imu, index, Measurement::Imu),
            SensorType::Odometry => pick(&self.odometry, index, Measurement::Odometry),
            SensorType::GroundTruth => pick(&self.ground_truth, index, Measurement::PoseStamped),
        }
    }

    /// Empty every queue and reset the ordering and cursor.
    pub fn clear_messages(&mut self) {
        self.point_clouds.clear();
        self.imu.clear();
        self.odometry.clear();
        self.ground_truth.clear();
        self.ordering.clear();
        self.pending_index = 0;
    }

    pub fn point_clouds(&self) -> &[Tagged<PointCloud>] {
        &self.point_clouds
    }

    pub fn imu(&self) -> &[Tagged<ImuSample>] {
        &self.imu
    }

    pub fn odometry(&self) -> &[Tagged<OdometrySample>] {
        &self.odometry
    }

    pub fn ground_truth(&self) -> &[Tagged<PoseStampedSample>] {
        &self.ground_truth
    }

    /// Total number of queued messages.
    pub fn len(&self) -> usize {
        self.point_clouds.len() + self.imu.len() + self.odometry.len() + self.ground_truth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
