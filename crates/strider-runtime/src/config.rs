//! Front-end configuration.
//!
//! [`FrontendConfig`] is deserialised from TOML by the CLI; every section
//! and field falls back to its default when absent, so an empty file is a
//! valid configuration.
//!
//! ```toml
//! [buffers]
//! imu_buffer_size_limit = 200
//! max_time_difference = 0.1
//!
//! [integration]
//! use_imu_integration = true
//! use_imu_yaw_integration = true
//!
//! [registration]
//! reference = "local_map"
//! ```

use std::path::PathBuf;

use nalgebra::{Quaternion, UnitQuaternion};
use serde::{Deserialize, Serialize};
use strider_perception::filter::{PassThroughFilter, PointCloudFilter, RangeFilter};
use strider_perception::icp::IcpConfig;
use strider_perception::integration::{FrameMismatchPolicy, SelectorSettings};
use strider_perception::local_map::{KeyframeSettings, SlidingWindowSettings};
use strider_perception::registration::{OdometrySettings, ReferenceMode};
use strider_types::StriderError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub frames: FramesConfig,
    pub buffers: BuffersConfig,
    pub integration: IntegrationConfig,
    pub keyframes: KeyframeSettings,
    pub sliding_window: SlidingWindowSettings,
    pub icp: IcpConfig,
    pub thresholds: ThresholdsConfig,
    pub registration: RegistrationConfig,
    pub open_space: OpenSpaceConfig,
    pub filter: FilterConfig,
    pub profiling: ProfilingConfig,
    pub ground_truth: GroundTruthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramesConfig {
    pub fixed_frame_id: String,
    pub base_frame_id: String,
    pub imu_frame_id: String,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            fixed_frame_id: "odom".to_string(),
            base_frame_id: "base_link".to_string(),
            imu_frame_id: "imu".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuffersConfig {
    pub imu_buffer_size_limit: usize,
    pub odometry_buffer_size_limit: usize,
    pub pose_stamped_buffer_size_limit: usize,
    /// Seconds between a scan and the nearest usable auxiliary sample.
    pub max_time_difference: f64,
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            imu_buffer_size_limit: 200,
            odometry_buffer_size_limit: 100,
            pose_stamped_buffer_size_limit: 100,
            max_time_difference: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub use_imu_integration: bool,
    pub use_imu_yaw_integration: bool,
    pub use_odometry_integration: bool,
    pub use_pose_stamped_integration: bool,
    /// Rotate IMU orientations into the base frame before taking deltas.
    pub convert_imu_to_base_frame: bool,
    /// IMU-to-base rotation as `[x, y, z, w]`.
    pub imu_to_base_rotation: [f64; 4],
    pub imu_frame_mismatch_policy: FrameMismatchPolicy,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            use_imu_integration: true,
            use_imu_yaw_integration: false,
            use_odometry_integration: false,
            use_pose_stamped_integration: false,
            convert_imu_to_base_frame: false,
            imu_to_base_rotation: [0.0, 0.0, 0.0, 1.0],
            imu_frame_mismatch_policy: FrameMismatchPolicy::CorrectExtrinsic,
        }
    }
}

impl IntegrationConfig {
    /// The configured IMU-to-base rotation, normalised.
    pub fn imu_to_base(&self) -> Result<UnitQuaternion<f64>, StriderError> {
        let [x, y, z, w] = self.imu_to_base_rotation;
        let q = Quaternion::new(w, x, y, z);
        strider_perception::attitude::unit_orientation(&q)
            .map_err(|e| StriderError::Config(format!("integration.imu_to_base_rotation: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub transform_thresholding: bool,
    /// Metres.
    pub max_translation: f64,
    /// Radians.
    pub max_rotation: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            transform_thresholding: true,
            max_translation: 1.0,
            max_rotation: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub reference: ReferenceMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSpaceConfig {
    /// Scans with more points than this are treated as open space.
    pub number_of_points_open_space: usize,
}

impl Default for OpenSpaceConfig {
    fn default() -> Self {
        Self {
            number_of_points_open_space: 20_000,
        }
    }
}

/// Range filter applied to every scan before registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// `false` hands scans to registration untouched.
    pub enabled: bool,
    pub min_range: f64,
    pub max_range: f64,
    /// Keep every n-th point of open-space scans.
    pub open_space_stride: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_range: 0.0,
            max_range: 200.0,
            open_space_stride: 2,
        }
    }
}

impl FilterConfig {
    pub fn build(&self) -> Box<dyn PointCloudFilter> {
        if self.enabled {
            Box::new(RangeFilter {
                min_range: self.min_range,
                max_range: self.max_range,
                open_space_stride: self.open_space_stride,
            })
        } else {
            Box::new(PassThroughFilter)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    pub enable_computation_time_profiling: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthConfig {
    /// ASCII PCD file seeding the local map.
    pub point_cloud_filename: Option<PathBuf>,
}

impl FrontendConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), StriderError> {
        fn ensure(ok: bool, what: &str) -> Result<(), StriderError> {
            if ok {
                Ok(())
            } else {
                Err(StriderError::Config(what.to_string()))
            }
        }

        let b = &self.buffers;
        ensure(b.imu_buffer_size_limit > 0, "buffers.imu_buffer_size_limit must be positive")?;
        ensure(
            b.odometry_buffer_size_limit > 0,
            "buffers.odometry_buffer_size_limit must be positive",
        )?;
        ensure(
            b.pose_stamped_buffer_size_limit > 0,
            "buffers.pose_stamped_buffer_size_limit must be positive",
        )?;
        ensure(
            b.max_time_difference.is_finite() && b.max_time_difference >= 0.0,
            "buffers.max_time_difference must be a non-negative number",
        )?;

        ensure(self.icp.iterations > 0, "icp.iterations must be positive")?;
        ensure(self.icp.corr_dist > 0.0, "icp.corr_dist must be positive")?;
        ensure(self.icp.tf_epsilon >= 0.0, "icp.tf_epsilon must be non-negative")?;

        ensure(
            self.thresholds.max_translation > 0.0 && self.thresholds.max_rotation > 0.0,
            "thresholds.max_translation and thresholds.max_rotation must be positive",
        )?;
        ensure(
            self.keyframes.translation_threshold >= 0.0 && self.keyframes.rotation_threshold >= 0.0,
            "keyframes thresholds must be non-negative",
        )?;

        let w = &self.sliding_window;
        ensure(w.velocity_buffer_size > 0, "sliding_window.velocity_buffer_size must be positive")?;
        ensure(w.max_keyframes > 0, "sliding_window.max_keyframes must be positive")?;
        ensure(w.box_filter_size > 0.0, "sliding_window.box_filter_size must be positive")?;

        let f = &self.filter;
        ensure(
            f.min_range >= 0.0 && f.min_range <= f.max_range,
            "filter.min_range must be non-negative and not above filter.max_range",
        )?;
        ensure(f.open_space_stride > 0, "filter.open_space_stride must be positive")?;

        self.integration.imu_to_base()?;
        Ok(())
    }

    pub fn selector_settings(&self) -> SelectorSettings {
        SelectorSettings {
            use_imu: self.integration.use_imu_integration,
            use_imu_yaw: self.integration.use_imu_yaw_integration,
            use_odometry: self.integration.use_odometry_integration,
            use_pose_stamped: self.integration.use_pose_stamped_integration,
            max_time_difference: self.buffers.max_time_difference,
        }
    }

    pub fn odometry_settings(&self) -> OdometrySettings {
        OdometrySettings {
            transform_thresholding: self.thresholds.transform_thresholding,
            max_translation: self.thresholds.max_translation,
            max_rotation: self.thresholds.max_rotation,
            reference: self.registration.reference,
        }
    }

    /// Frame the first IMU sample is expected in.
    pub fn expected_imu_frame(&self) -> &str {
        if self.integration.convert_imu_to_base_frame {
            &self.frames.imu_frame_id
        } else {
            &self.frames.base_frame_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = toml::from_str::<FrontendConfig>("").unwrap();
        assert_eq!(config, FrontendConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = toml::from_str::<FrontendConfig>(
            r#"
            [buffers]
            imu_buffer_size_limit = 7

            [registration]
            reference = "local_map"

            [integration]
            imu_frame_mismatch_policy = "disable_imu"
            "#,
        )
        .unwrap();
        assert_eq!(config.buffers.imu_buffer_size_limit, 7);
        assert!((config.buffers.max_time_difference - 0.1).abs() < 1e-12);
        assert_eq!(config.registration.reference, ReferenceMode::LocalMap);
        assert_eq!(
            config.integration.imu_frame_mismatch_policy,
            FrameMismatchPolicy::DisableImu
        );
        assert!(config.integration.use_imu_integration);
    }

    #[test]
    fn zero_buffer_limit_is_rejected() {
        let mut config = FrontendConfig::default();
        config.buffers.odometry_buffer_size_limit = 0;
        assert!(matches!(config.validate(), Err(StriderError::Config(_))));
    }

    #[test]
    fn degenerate_extrinsic_is_rejected() {
        let mut config = FrontendConfig::default();
        config.integration.imu_to_base_rotation = [0.0; 4];
        assert!(matches!(config.validate(), Err(StriderError::Config(_))));
    }

    #[test]
    fn inverted_filter_range_is_rejected() {
        let mut config = FrontendConfig::default();
        config.filter.min_range = 10.0;
        config.filter.max_range = 1.0;
        assert!(matches!(config.validate(), Err(StriderError::Config(_))));
    }

    #[test]
    fn expected_imu_frame_follows_conversion_flag() {
        let mut config = FrontendConfig::default();
        assert_eq!(config.expected_imu_frame(), "base_link");
        config.integration.convert_imu_to_base_frame = true;
        assert_eq!(config.expected_imu_frame(), "imu");
    }

    #[test]
    fn settings_mirror_config() {
        let mut config = FrontendConfig::default();
        config.integration.use_odometry_integration = true;
        config.thresholds.max_translation = 0.3;
        assert!(config.selector_settings().use_odometry);
        assert!((config.odometry_settings().max_translation - 0.3).abs() < 1e-12);
    }
}
