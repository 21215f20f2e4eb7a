//! `strider-perception` – the LiDAR-inertial odometry core.
//!
//! Turns an asynchronous, multi-rate stream of scans and auxiliary attitude
//! samples into one thresholded pose estimate per scan.
//!
//! # Modules
//!
//! - [`buffer`] – [`TimeIndexedBuffer`][buffer::TimeIndexedBuffer]: bounded,
//!   stamp-ordered sample storage with nearest and bracketing lookups.
//! - [`attitude`] – full and yaw-only rotation deltas between two samples.
//! - [`integration`] – [`ModeSelector`][integration::ModeSelector]: picks
//!   IMU, odometry, pose-stamped or no rotation hypothesis for each scan.
//! - [`registration`] – [`PointCloudOdometry`][registration::PointCloudOdometry]:
//!   scan-to-scan / scan-to-map registration with thresholded acceptance.
//! - [`icp`] – [`PointToPointIcp`][icp::PointToPointIcp]: the registration
//!   capability used in production.
//! - [`octree`] – spatial index backing ICP correspondences and map windows.
//! - [`local_map`] – keyframe admission and the velocity-aware sliding
//!   window.
//! - [`synchronizer`] – deterministic chronological replay order.
//! - [`filter`] – the point-cloud filter seam.
//! - [`transform`] – rigid-transform helpers.

pub mod attitude;
pub mod buffer;
pub mod filter;
pub mod icp;
pub mod integration;
pub mod local_map;
pub mod octree;
pub mod registration;
pub mod synchronizer;
pub mod transform;
