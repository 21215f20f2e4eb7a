//! Keyframe admission and velocity-aware sliding-window map maintenance.
//!
//! Two independent, deterministic mechanisms run once per scan:
//!
//! - [`LocalMap::consider`] admits the scan as a [`Keyframe`] when it is the
//!   first scan (if configured) or when it moved or turned far enough from
//!   the last keyframe.
//! - [`SlidingWindow::update`] keeps rolling averages of translational and
//!   rotational velocity and reports when the map window should be
//!   refreshed; [`LocalMap::trim_to_window`] then drops keyframes outside
//!   the box around the robot and the oldest ones beyond `max_keyframes`.

use std::collections::VecDeque;

use nalgebra::{Isometry3, Point3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::octree::Aabb;
use crate::transform::{pose_delta, rotation_magnitude, transform_points, translation_magnitude};

// ────────────────────────────────────────────────────────────────────────────
// Keyframes
// ────────────────────────────────────────────────────────────────────────────

/// An admitted scan. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    pub id: u64,
    pub stamp: f64,
    /// Integrated pose at admission.
    pub pose: Isometry3<f64>,
    /// Scan points in the body frame at admission.
    pub points: Vec<Point3<f64>>,
}

impl Keyframe {
    /// Points in the fixed frame.
    pub fn world_points(&self) -> Vec<Point3<f64>> {
        transform_points(&self.pose, &self.points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyframeSettings {
    /// Metres.
    pub translation_threshold: f64,
    /// Radians.
    pub rotation_threshold: f64,
    pub add_first_scan_to_key: bool,
}

impl Default for KeyframeSettings {
    fn default() -> Self {
        Self {
            translation_threshold: 1.0,
            rotation_threshold: 0.5,
            add_first_scan_to_key: true,
        }
    }
}

/// Ordered keyframe sequence, oldest first.
#[derive(Debug, Clone)]
pub struct LocalMap {
    settings: KeyframeSettings,
    keyframes: VecDeque<Keyframe>,
    last_keyframe_pose: Isometry3<f64>,
    first_scan_pending: bool,
    next_id: u64,
}

impl LocalMap {
    pub fn new(settings: KeyframeSettings) -> Self {
        Self {
            settings,
            keyframes: VecDeque::new(),
            last_keyframe_pose: Isometry3::identity(),
            first_scan_pending: true,
            next_id: 0,
        }
    }

    /// Seed the map with a prior cloud (already in the fixed frame) as a
    /// keyframe at the identity pose. First-scan admission no longer
    /// applies afterwards.
    pub fn seed(&mut self, points: Vec<Point3<f64>>) {
        self.push(0.0, Isometry3::identity(), points);
        self.first_scan_pending = false;
    }

    /// Whether a scan at `pose` would be admitted.
    pub fn should_admit(&self, pose: &Isometry3<f64>) -> bool {
        if self.first_scan_pending && self.settings.add_first_scan_to_key {
            return true;
        }
        let delta = pose_delta(&self.last_keyframe_pose, pose);
        translation_magnitude(&delta) > self.settings.translation_threshold
            || rotation_magnitude(&delta) > self.settings.rotation_threshold
    }

    /// Admit the scan if it qualifies; returns the new keyframe id.
    pub fn consider(&mut self, stamp: f64, pose: &Isometry3<f64>, points: &[Point3<f64>]) -> Option<u64> {
        let admit = self.should_admit(pose);
        self.first_scan_pending = false;
        if !admit {
            return None;
        }
        let id = self.push(stamp, *pose, points.to_vec());
        debug!(id, stamp, keyframes = self.keyframes.len(), "keyframe admitted");
        Some(id)
    }

    fn push(&mut self, stamp: f64, pose: Isometry3<f64>, points: Vec<Point3<f64>>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.keyframes.push_back(Keyframe {
            id,
            stamp,
            pose,
            points,
        });
        self.last_keyframe_pose = pose;
        id
    }

    /// Drop keyframes whose pose lies outside a cube of edge
    /// `box_filter_size` around `centre`, then the oldest beyond
    /// `max_keyframes`. The newest keyframe always survives.
    pub fn trim_to_window(&mut self, centre: &Isometry3<f64>, box_filter_size: f64, max_keyframes: usize) -> usize {
        let before = self.keyframes.len();
        let window = Aabb::centred(Point3::from(centre.translation.vector), box_filter_size);
        let newest = self.keyframes.back().map(|k| k.id);
        self.keyframes.retain(|k| {
            Some(k.id) == newest || window.contains_point(&Point3::from(k.pose.translation.vector))
        });
        while self.keyframes.len() > max_keyframes.max(1) {
            self.keyframes.pop_front();
        }
        before - self.keyframes.len()
    }

    /// Every keyframe's points in the fixed frame.
    pub fn world_points(&self) -> Vec<Point3<f64>> {
        self.keyframes.iter().flat_map(|k| k.world_points()).collect()
    }

    pub fn keyframes(&self) -> impl Iterator<Item = &Keyframe> {
        self.keyframes.iter()
    }

    pub fn last_keyframe_pose(&self) -> &Isometry3<f64> {
        &self.last_keyframe_pose
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sliding window
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlidingWindowSettings {
    pub enabled: bool,
    /// Edge of the cube kept around the robot, metres.
    pub box_filter_size: f64,
    pub velocity_buffer_size: usize,
    /// Travel since the last refresh that triggers a new one, metres.
    pub translation_threshold: f64,
    /// m/s.
    pub translational_velocity_threshold: f64,
    /// rad/s.
    pub rotational_velocity_threshold: f64,
    pub max_keyframes: usize,
}

impl Default for SlidingWindowSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            box_filter_size: 50.0,
            velocity_buffer_size: 10,
            translation_threshold: 10.0,
            translational_velocity_threshold: 5.0,
            rotational_velocity_threshold: 2.0,
            max_keyframes: 50,
        }
    }
}

/// Rolling velocity tracker deciding when to refresh the map window.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    settings: SlidingWindowSettings,
    translational_velocities: VecDeque<f64>,
    rotational_velocities: VecDeque<f64>,
    previous: Option<(f64, Isometry3<f64>)>,
    last_refresh_pose: Isometry3<f64>,
}

impl SlidingWindow {
    pub fn new(settings: SlidingWindowSettings) -> Self {
        Self {
            settings,
            translational_velocities: VecDeque::with_capacity(settings.velocity_buffer_size),
            rotational_velocities: VecDeque::with_capacity(settings.velocity_buffer_size),
            previous: None,
            last_refresh_pose: Isometry3::identity(),
        }
    }

    /// Feed the pose of a processed scan; true when the window should be
    /// refreshed now.
    pub fn update(&mut self, stamp: f64, pose: &Isometry3<f64>) -> bool {
        if let Some((previous_stamp, previous_pose)) = self.previous {
            let dt = stamp - previous_stamp;
            if dt > 0.0 {
                let delta = pose_delta(&previous_pose, pose);
                push_bounded(
                    &mut self.translational_velocities,
                    translation_magnitude(&delta) / dt,
                    self.settings.velocity_buffer_size,
                );
                push_bounded(
                    &mut self.rotational_velocities,
                    rotation_magnitude(&delta) / dt,
                    self.settings.velocity_buffer_size,
                );
            }
        }
        self.previous = Some((stamp, *pose));

        if !self.settings.enabled {
            return false;
        }
        let travelled = translation_magnitude(&pose_delta(&self.last_refresh_pose, pose));
        let refresh = travelled > self.settings.translation_threshold
            || self.translational_velocity() > self.settings.translational_velocity_threshold
            || self.rotational_velocity() > self.settings.rotational_velocity_threshold;
        if refresh {
            debug!(
                stamp,
                travelled,
                translational_velocity = self.translational_velocity(),
                rotational_velocity = self.rotational_velocity(),
                "map window refresh"
            );
            self.last_refresh_pose = *pose;
        }
        refresh
    }

    /// Average translational velocity over the buffer, m/s.
    pub fn translational_velocity(&self) -> f64 {
        average(&self.translational_velocities)
    }

    /// Average rotational velocity over the buffer, rad/s.
    pub fn rotational_velocity(&self) -> f64 {
        average(&self.rotational_velocities)
    }

    pub fn settings(&self) -> &SlidingWindowSettings {
        &self.settings
    }
}

fn push_bounded(buffer: &mut VecDeque<f64>, value: f64, limit: usize) {
    buffer.push_back(value);
    while buffer.len() > limit {
        buffer.pop_front();
    }
}

fn average(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
