//! Deterministic offline replay.
//!
//! A replay log is JSON lines, one [`Measurement`] per line with its `kind`
//! tag and an optional free-form `tag` (typically the recorded topic):
//!
//! ```text
//! {"kind":"imu","tag":"/imu/data","header":{"stamp":0.0,"frame_id":"base_link"},"orientation":[0,0,0,1]}
//! {"kind":"point_cloud","header":{"seq":0,"stamp":0.0},"points":[[1,0,0],[0,2,0]]}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. [`load_log`] queues
//! everything in a [`MeasurementSynchronizer`]; [`replay`] sorts it and feeds
//! the frontend callbacks in that order, so a log always replays the same way
//! regardless of how it was recorded.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use strider_perception::registration::PointSetRegistration;
use strider_perception::synchronizer::MeasurementSynchronizer;
use strider_types::{Measurement, PoseEstimate, SensorType, StriderError};
use tracing::{debug, info};

use crate::frontend::{Frontend, ScanOutput};

/// Parse a replay log into a synchronizer, unsorted.
pub fn load_log(path: &Path) -> Result<MeasurementSynchronizer, StriderError> {
    let file = File::open(path)?;
    let mut sync = MeasurementSynchronizer::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (measurement, tag) = parse_line(line).map_err(|details| StriderError::ReplayLog {
            line: index + 1,
            details,
        })?;
        sync.add(measurement, tag);
    }
    info!(path = %path.display(), messages = sync.len(), "replay log loaded");
    Ok(sync)
}

fn parse_line(line: &str) -> Result<(Measurement, Option<String>), String> {
    let mut value: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| "expected a JSON object".to_string())?;
    let tag = match object.remove("tag") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(tag)) => Some(tag),
        Some(other) => return Err(format!("tag must be a string, got {other}")),
    };
    let measurement = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok((measurement, tag))
}

/// Sort `sync` and dispatch every message to `frontend`, returning the
/// output of every scan in replay order.
pub fn replay<R: PointSetRegistration>(
    frontend: &Frontend<R>,
    sync: &mut MeasurementSynchronizer,
) -> Vec<ScanOutput> {
    sync.sort_messages();
    let mut outputs = Vec::with_capacity(sync.point_clouds().len());
    let mut dispatched = [0usize; 4];
    while let Some((sensor_type, index)) = sync.next_message() {
        let Some((measurement, tag)) = sync.measurement(sensor_type, index) else {
            continue;
        };
        debug!(kind = %sensor_type, index, tag, "replaying");
        dispatched[sensor_type as usize] += 1;
        if let Some(output) = frontend.handle(measurement) {
            outputs.push(output);
        }
    }
    info!(
        scans = dispatched[SensorType::PointCloud as usize],
        imu = dispatched[SensorType::Imu as usize],
        odometry = dispatched[SensorType::Odometry as usize],
        ground_truth = dispatched[SensorType::GroundTruth as usize],
        "replay finished"
    );
    outputs
}

/// One TUM trajectory row: `t x y z qx qy qz qw`.
pub fn tum_line(estimate: &PoseEstimate) -> String {
    let t = estimate.pose.translation.vector;
    let q = estimate.pose.rotation;
    format!(
        "{:.9} {:.6} {:.6} {:.6} {:.9} {:.9} {:.9} {:.9}",
        estimate.stamp, t.x, t.y, t.z, q.i, q.j, q.k, q.w
    )
}

/// Write the integrated trajectory of `outputs` in TUM format.
pub fn write_tum(path: &Path, outputs: &[ScanOutput]) -> Result<(), StriderError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for output in outputs {
        writeln!(writer, "{}", tum_line(&output.integrated))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use nalgebra::{Isometry3, Translation3, UnitQuaternion};
    use strider_perception::integration::IntegrationMode;
    use strider_perception::registration::{Alignment, RegistrationError};
    use strider_perception::filter::PassThroughFilter;

    use crate::config::FrontendConfig;

    struct EchoGuess;

    impl PointSetRegistration for EchoGuess {
        fn align(
            &self,
            source: &[nalgebra::Point3<f64>],
            _target: &[nalgebra::Point3<f64>],
            guess: &Isometry3<f64>,
        ) -> Result<Alignment, RegistrationError> {
            Ok(Alignment {
                transform: *guess,
                fitness: 0.0,
                aligned: source.to_vec(),
            })
        }
    }

    const LOG: &str = r#"
# recorded out of order on purpose
{"kind":"point_cloud","header":{"seq":1,"stamp":1.0},"points":[[1,0,0],[0,2,0]]}
{"kind":"imu","tag":"/imu","header":{"stamp":0.95,"frame_id":"base_link"},"orientation":[0,0,0.7071067811865476,0.7071067811865476]}
{"kind":"point_cloud","header":{"seq":0,"stamp":0.01},"points":[[1,0,0],[0,2,0]]}

{"kind":"imu","tag":"/imu","header":{"stamp":0.0,"frame_id":"base_link"},"orientation":[0,0,0,1]}
{"kind":"pose_stamped","header":{"stamp":0.5,"frame_id":"map"},"pose":{"position":[0,0,0],"orientation":[0,0,0,1]}}
"#;

    fn write_log(text: &str) -> Result<tempfile::NamedTempFile, Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(text.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn log_is_loaded_with_tags() -> Result<(), Box<dyn std::error::Error>> {
        let file = write_log(LOG)?;
        let sync = load_log(file.path())?;
        assert_eq!(sync.len(), 5);
        assert_eq!(sync.point_clouds().len(), 2);
        assert_eq!(sync.imu()[0].tag.as_deref(), Some("/imu"));
        assert_eq!(sync.ground_truth().len(), 1);
        Ok(())
    }

    #[test]
    fn replay_follows_time_order() -> Result<(), Box<dyn std::error::Error>> {
        let file = write_log(LOG)?;
        let mut sync = load_log(file.path())?;
        let mut config = FrontendConfig::default();
        config.thresholds.transform_thresholding = false;
        config.integration.use_imu_yaw_integration = true;
        let frontend = Frontend::with_parts(config, EchoGuess, Box::new(PassThroughFilter))?;

        let outputs = replay(&frontend, &mut sync);
        assert_eq!(outputs.len(), 2);
        assert!((outputs[0].stamp - 0.01).abs() < 1e-12);
        assert!((outputs[1].stamp - 1.0).abs() < 1e-12);
        assert_eq!(outputs[1].mode, IntegrationMode::Imu);
        assert!((outputs[1].initial_guess.rotation.angle() - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert_eq!(outputs[1].diagnostics.dropped_scans, 0);
        Ok(())
    }

    #[test]
    fn malformed_line_reports_its_number() -> Result<(), Box<dyn std::error::Error>> {
        let file = write_log("{\"kind\":\"imu\",\"header\":{\"stamp\":0.0},\"orientation\":[0,0,0,1]}\n{not json}\n")?;
        match load_log(file.path()) {
            Err(StriderError::ReplayLog { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unknown_kind_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let file = write_log("{\"kind\":\"sonar\",\"header\":{\"stamp\":0.0}}\n")?;
        assert!(matches!(load_log(file.path()), Err(StriderError::ReplayLog { line: 1, .. })));
        Ok(())
    }

    #[test]
    fn tum_rows_are_written() -> Result<(), Box<dyn std::error::Error>> {
        let estimate = PoseEstimate {
            stamp: 2.5,
            frame_id: "odom".into(),
            pose: Isometry3::from_parts(Translation3::new(1.0, 2.0, 3.0), UnitQuaternion::identity()),
        };
        assert_eq!(
            tum_line(&estimate),
            "2.500000000 1.000000 2.000000 3.000000 0.000000000 0.000000000 0.000000000 1.000000000"
        );

        let file = write_log(LOG)?;
        let mut sync = load_log(file.path())?;
        let frontend = Frontend::with_parts(FrontendConfig::default(), EchoGuess, Box::new(PassThroughFilter))?;
        let outputs = replay(&frontend, &mut sync);
        let out = tempfile::NamedTempFile::new()?;
        write_tum(out.path(), &outputs)?;
        let text = std::fs::read_to_string(out.path())?;
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l.split_whitespace().count() == 8));
        Ok(())
    }
}
