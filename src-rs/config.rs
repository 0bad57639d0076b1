//! Segmenter configuration: defaults, environment overrides, and the JSON load/save boundary.

use crate::error::ConfigError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const SERVER_URL_ENV: &str = "GARMENT_SERVER_URL";
pub const TIMEOUT_ENV: &str = "GARMENT_TIMEOUT_SECS";

/// Settings consumed by the client, session and standardization stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Base URL of the inference server, without the endpoint path.
    pub server_url: String,

    /// Bound on each network call, in seconds. One attempt per request.
    pub request_timeout_secs: u64,

    /// JPEG quality of the uploaded working image.
    pub jpeg_quality: u8,

    pub upload_path: String,

    pub ping_path: String,

    pub calibration: CalibrationSettings,
}

/// Physical calibration used to standardize garment scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Real distance between the wearer's eyes.
    pub eye_distance_cm: f64,

    /// Output scale of a standardized garment.
    pub target_pixels_per_cm: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            eye_distance_cm: 6.0,
            target_pixels_per_cm: 40.0,
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 30,
            jpeg_quality: 100,
            upload_path: "/server/image-upload/".to_string(),
            ping_path: "/server/print-message/".to_string(),
            calibration: CalibrationSettings::default(),
        }
    }
}

impl SegmenterConfig {
    /// Reads a JSON config file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Applies `GARMENT_SERVER_URL` / `GARMENT_TIMEOUT_SECS` when set and non-blank.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(url) = non_blank_env(SERVER_URL_ENV) {
            self.server_url = url;
        }
        if let Some(raw) = non_blank_env(TIMEOUT_ENV) {
            self.request_timeout_secs = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{TIMEOUT_ENV} must be a whole number of seconds, got {raw:?}"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be positive".to_string()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if !self.upload_path.starts_with('/') || !self.ping_path.starts_with('/') {
            return Err(ConfigError::Invalid("endpoint paths must start with '/'".to_string()));
        }
        let cal = &self.calibration;
        if !(cal.eye_distance_cm.is_finite() && cal.eye_distance_cm > 0.0) {
            return Err(ConfigError::Invalid("eye_distance_cm must be positive".to_string()));
        }
        if !(cal.target_pixels_per_cm.is_finite() && cal.target_pixels_per_cm > 0.0) {
            return Err(ConfigError::Invalid("target_pixels_per_cm must be positive".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parsed `server_url`; only http(s) URLs with a host are accepted.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(self.server_url.trim()).map_err(|e| {
            ConfigError::Invalid(format!("invalid server_url {:?}: {e}", self.server_url))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Invalid(format!(
                "server_url must use http or https, got {:?}",
                self.server_url
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid(format!(
                "server_url has no host: {:?}",
                self.server_url
            )));
        }
        Ok(url)
    }

    /// Endpoint paths are absolute, so they replace any path on the base URL.
    pub fn upload_url(&self) -> Result<Url, ConfigError> {
        self.endpoint(&self.upload_path)
    }

    pub fn ping_url(&self) -> Result<Url, ConfigError> {
        self.endpoint(&self.ping_path)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        self.base_url()?
            .join(path)
            .map_err(|e| ConfigError::Invalid(format!("invalid endpoint path {path:?}: {e}")))
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = SegmenterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.upload_url().unwrap().as_str(), "http://127.0.0.1:8000/server/image-upload/");
        assert_eq!(config.ping_url().unwrap().as_str(), "http://127.0.0.1:8000/server/print-message/");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.calibration.eye_distance_cm, 6.0);
    }

    #[test]
    fn trailing_slash_in_base_is_dropped() {
        let config = SegmenterConfig {
            server_url: "https://masks.example.com/".to_string(),
            ..SegmenterConfig::default()
        };
        assert_eq!(
            config.upload_url().unwrap().as_str(),
            "https://masks.example.com/server/image-upload/"
        );
    }

    #[test]
    fn partial_file_falls_back_to_defaults_and_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg").join("segmenter.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"server_url": "http://10.0.0.2:9000", "calibration": {"eye_distance_cm": 6.5}}"#)
            .unwrap();

        let loaded = SegmenterConfig::load(&path).unwrap();
        assert_eq!(loaded.server_url, "http://10.0.0.2:9000");
        assert_eq!(loaded.request_timeout_secs, 30);
        assert_eq!(loaded.calibration.eye_distance_cm, 6.5);
        assert_eq!(loaded.calibration.target_pixels_per_cm, 40.0);

        let saved = dir.path().join("out").join("saved.json");
        loaded.save(&saved).unwrap();
        assert_eq!(SegmenterConfig::load(&saved).unwrap(), loaded);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_url = SegmenterConfig {
            server_url: "ftp://x".to_string(),
            ..SegmenterConfig::default()
        };
        assert!(matches!(bad_url.validate(), Err(ConfigError::Invalid(_))));

        for bad in ["http://exa mple.com", "http://[::1", "https://a b/c", "not a url", "http://"] {
            let config = SegmenterConfig {
                server_url: bad.to_string(),
                ..SegmenterConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "{bad:?} should be rejected"
            );
        }

        let zero_timeout = SegmenterConfig {
            request_timeout_secs: 0,
            ..SegmenterConfig::default()
        };
        assert!(zero_timeout.validate().is_err());

        let mut bad_cal = SegmenterConfig::default();
        bad_cal.calibration.eye_distance_cm = 0.0;
        assert!(bad_cal.validate().is_err());
    }
}
