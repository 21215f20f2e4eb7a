//! Configuration vault – reads/writes `~/.strider/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use strider_perception::registration::ReferenceMode;
use strider_runtime::FrontendConfig;
use tracing::warn;

/// Return the path to `~/.strider/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".strider").join("config.toml")
}

/// Load the config from a specific path. Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<FrontendConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: FrontendConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}

/// Apply `STRIDER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STRIDER_GT_POINT_CLOUD` | `ground_truth.point_cloud_filename` |
/// | `STRIDER_REFERENCE` | `registration.reference` (`previous_scan` / `local_map`) |
/// | `STRIDER_USE_IMU` | `integration.use_imu_integration` |
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut FrontendConfig) {
    if let Ok(v) = std::env::var("STRIDER_GT_POINT_CLOUD") {
        cfg.ground_truth.point_cloud_filename = (!v.is_empty()).then(|| PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("STRIDER_REFERENCE") {
        match parse_reference(&v) {
            Some(reference) => cfg.registration.reference = reference,
            None => warn!(value = %v, "ignoring STRIDER_REFERENCE"),
        }
    }
    if let Ok(v) = std::env::var("STRIDER_USE_IMU") {
        match v.trim().parse::<bool>() {
            Ok(enabled) => cfg.integration.use_imu_integration = enabled,
            Err(_) => warn!(value = %v, "ignoring STRIDER_USE_IMU"),
        }
    }
}

fn parse_reference(value: &str) -> Option<ReferenceMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "previous_scan" => Some(ReferenceMode::PreviousScan),
        "local_map" => Some(ReferenceMode::LocalMap),
        _ => None,
    }
}

/// Render `cfg` as TOML.
pub fn to_toml(cfg: &FrontendConfig) -> Result<String, String> {
    toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))
}

/// Save the config to a specific path, creating parent directories.
pub fn save_to(cfg: &FrontendConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = to_toml(cfg)?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = FrontendConfig::default();
        cfg.integration.use_imu_yaw_integration = true;
        cfg.keyframes.translation_threshold = 0.75;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn default_toml_mentions_every_section() {
        let text = to_toml(&FrontendConfig::default()).expect("serialize");
        for section in ["[buffers]", "[integration]", "[keyframes]", "[sliding_window]", "[icp]", "[thresholds]"] {
            assert!(text.contains(section), "missing {section}");
        }
    }

    #[test]
    fn config_path_points_to_strider_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".strider"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[buffers]\nimu_buffer_size_limit = \"many\"\n").expect("write");
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn apply_env_overrides_sets_ground_truth_cloud() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("STRIDER_GT_POINT_CLOUD", "/maps/site.pcd") };
        let mut cfg = FrontendConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ground_truth.point_cloud_filename, Some(PathBuf::from("/maps/site.pcd")));
        unsafe { std::env::remove_var("STRIDER_GT_POINT_CLOUD") };
    }

    #[test]
    fn reference_values_parse() {
        assert_eq!(parse_reference("local_map"), Some(ReferenceMode::LocalMap));
        assert_eq!(parse_reference(" PREVIOUS_SCAN "), Some(ReferenceMode::PreviousScan));
        assert_eq!(parse_reference("keyframes"), None);
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_use_imu() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("STRIDER_USE_IMU", "sometimes") };
        let mut cfg = FrontendConfig::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.integration.use_imu_integration);
        unsafe { std::env::set_var("STRIDER_USE_IMU", "false") };
        apply_env_overrides(&mut cfg);
        assert!(!cfg.integration.use_imu_integration);
        unsafe { std::env::remove_var("STRIDER_USE_IMU") };
    }
}
