//! Application configuration
//!
//! Loaded from environment variables (a `.env` file is honoured by the
//! binary) and split into the subsets consumed by the stream workers and
//! the violation engine.

use crate::error::{Error, Result};
use crate::models::{CameraSource, FrameSize, PpeKind};
use crate::violation_engine::RequiredPpe;
use std::collections::HashSet;
use std::time::Duration;

/// Source read rate the subsampling stride is derived from
pub const NATIVE_READ_RATE: u32 = 30;

/// Trackers silent for longer than this are dropped
pub const TRACKER_SILENCE_SECS: f64 = 5.0;

/// Padding around the person box in alert snapshots
pub const SNAPSHOT_PADDING_PX: u32 = 20;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Configured camera sources
    pub cameras: Vec<CameraSource>,
    /// Frame size requested from sources and fed to the detector
    pub frame_size: FrameSize,
    /// Frames per second forwarded for detection
    pub fps: u32,
    /// Minimum sustained violation before an alert (seconds)
    pub violation_debounce_seconds: f64,
    /// Minimum interval between alerts for one violation key (seconds)
    pub violation_cooldown_seconds: f64,
    /// IoU needed to associate a PPE box with a person box
    pub iou_threshold: f64,
    /// Required PPE before any session config arrives
    pub required_ppe: RequiredPpe,
    /// Delay between reconnect attempts (seconds)
    pub camera_reconnect_delay: f64,
    /// Attempts before a stream gives up permanently
    pub max_reconnect_attempts: u32,
    /// Object detector base URL
    pub detector_url: String,
    /// Object detector endpoint path
    pub detector_endpoint: String,
    /// Detector request timeout (seconds)
    pub detector_timeout: f64,
    /// Use the built-in mock detector instead of HTTP
    pub use_mock_detector: bool,
    /// Cloud backend URL (alerts, snapshots, sessions)
    pub supabase_url: Option<String>,
    /// Cloud backend API key
    pub supabase_key: Option<String>,
    /// Storage bucket for violation snapshots
    pub snapshot_storage_bucket: String,
    /// JPEG quality for snapshots (1-100)
    pub snapshot_quality: u8,
    /// Session poll interval (seconds)
    pub session_poll_interval: f64,
    /// Grace period for worker shutdown (seconds)
    pub shutdown_grace_seconds: f64,
    /// Default tracing filter
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cameras: vec![CameraSource::new("camera_0", "0")],
            frame_size: FrameSize::new(640, 480),
            fps: 10,
            violation_debounce_seconds: 2.0,
            violation_cooldown_seconds: 5.0,
            iou_threshold: 0.3,
            required_ppe: RequiredPpe::from_flags(true, true, false, false),
            camera_reconnect_delay: 5.0,
            max_reconnect_attempts: 10,
            detector_url: "http://localhost:8001".to_string(),
            detector_endpoint: "/detect".to_string(),
            detector_timeout: 5.0,
            use_mock_detector: false,
            supabase_url: None,
            supabase_key: None,
            snapshot_storage_bucket: "violation-snapshots".to_string(),
            snapshot_quality: 85,
            session_poll_interval: 5.0,
            shutdown_grace_seconds: 5.0,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let cameras = match get("CAMERA_SOURCES") {
            Some(raw) => parse_camera_sources(&raw)?,
            None => defaults.cameras.clone(),
        };

        let defaults_required = &defaults.required_ppe;
        let required_ppe = RequiredPpe::from_flags(
            parse_bool(get("REQUIRE_GOGGLES"), defaults_required.is_required(PpeKind::Goggles)),
            parse_bool(get("REQUIRE_LAB_COAT"), defaults_required.is_required(PpeKind::LabCoat)),
            parse_bool(get("REQUIRE_GLOVES"), defaults_required.is_required(PpeKind::Gloves)),
            parse_bool(get("REQUIRE_HELMET"), defaults_required.is_required(PpeKind::Helmet)),
        );

        let config = Self {
            cameras,
            frame_size: FrameSize::new(
                parse_num("FRAME_WIDTH", get("FRAME_WIDTH"), defaults.frame_size.width)?,
                parse_num("FRAME_HEIGHT", get("FRAME_HEIGHT"), defaults.frame_size.height)?,
            ),
            fps: parse_num("FPS", get("FPS"), defaults.fps)?,
            violation_debounce_seconds: parse_num(
                "VIOLATION_DEBOUNCE_SECONDS",
                get("VIOLATION_DEBOUNCE_SECONDS"),
                defaults.violation_debounce_seconds,
            )?,
            violation_cooldown_seconds: parse_num(
                "VIOLATION_COOLDOWN_SECONDS",
                get("VIOLATION_COOLDOWN_SECONDS"),
                defaults.violation_cooldown_seconds,
            )?,
            iou_threshold: parse_num("IOU_THRESHOLD", get("IOU_THRESHOLD"), defaults.iou_threshold)?,
            required_ppe,
            camera_reconnect_delay: parse_num(
                "CAMERA_RECONNECT_DELAY",
                get("CAMERA_RECONNECT_DELAY"),
                defaults.camera_reconnect_delay,
            )?,
            max_reconnect_attempts: parse_num(
                "MAX_RECONNECT_ATTEMPTS",
                get("MAX_RECONNECT_ATTEMPTS"),
                defaults.max_reconnect_attempts,
            )?,
            detector_url: get("DETECTOR_URL").unwrap_or(defaults.detector_url),
            detector_endpoint: get("DETECTOR_ENDPOINT").unwrap_or(defaults.detector_endpoint),
            detector_timeout: parse_num(
                "DETECTOR_TIMEOUT",
                get("DETECTOR_TIMEOUT"),
                defaults.detector_timeout,
            )?,
            use_mock_detector: parse_bool(get("USE_MOCK_DETECTOR"), defaults.use_mock_detector),
            supabase_url: get("SUPABASE_URL"),
            supabase_key: get("SUPABASE_KEY").or_else(|| get("SUPABASE_ANON_KEY")),
            snapshot_storage_bucket: get("SNAPSHOT_STORAGE_BUCKET")
                .unwrap_or(defaults.snapshot_storage_bucket),
            snapshot_quality: parse_num(
                "SNAPSHOT_QUALITY",
                get("SNAPSHOT_QUALITY"),
                defaults.snapshot_quality,
            )?,
            session_poll_interval: parse_num(
                "SESSION_POLL_INTERVAL",
                get("SESSION_POLL_INTERVAL"),
                defaults.session_poll_interval,
            )?,
            shutdown_grace_seconds: parse_num(
                "SHUTDOWN_GRACE_SECONDS",
                get("SHUTDOWN_GRACE_SECONDS"),
                defaults.shutdown_grace_seconds,
            )?,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the runtime relies on
    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(Error::Config("no camera sources configured".to_string()));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.id.is_empty() {
                return Err(Error::Config("camera id must not be empty".to_string()));
            }
            if !seen.insert(camera.id.as_str()) {
                return Err(Error::Config(format!("duplicate camera id: {}", camera.id)));
            }
        }

        if self.fps == 0 {
            return Err(Error::Config("FPS must be at least 1".to_string()));
        }
        if self.frame_size.width == 0 || self.frame_size.height == 0 {
            return Err(Error::Config("frame dimensions must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(Error::Config(format!(
                "IOU_THRESHOLD must be within [0, 1], got {}",
                self.iou_threshold
            )));
        }

        let durations = [
            ("VIOLATION_DEBOUNCE_SECONDS", self.violation_debounce_seconds),
            ("VIOLATION_COOLDOWN_SECONDS", self.violation_cooldown_seconds),
            ("CAMERA_RECONNECT_DELAY", self.camera_reconnect_delay),
            ("DETECTOR_TIMEOUT", self.detector_timeout),
            ("SESSION_POLL_INTERVAL", self.session_poll_interval),
            ("SHUTDOWN_GRACE_SECONDS", self.shutdown_grace_seconds),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!("{} must be non-negative, got {}", name, value)));
            }
        }

        if !(1..=100).contains(&self.snapshot_quality) {
            return Err(Error::Config(format!(
                "SNAPSHOT_QUALITY must be within 1-100, got {}",
                self.snapshot_quality
            )));
        }

        Ok(())
    }

    /// Settings consumed by each camera stream worker
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            frame_size: self.frame_size,
            fps: self.fps,
            native_read_rate: NATIVE_READ_RATE,
            reconnect_delay: Duration::from_secs_f64(self.camera_reconnect_delay),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }

    /// Settings consumed by the violation engine
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            iou_threshold: self.iou_threshold,
            debounce: chrono::Duration::milliseconds((self.violation_debounce_seconds * 1000.0) as i64),
            cooldown: chrono::Duration::milliseconds((self.violation_cooldown_seconds * 1000.0) as i64),
            tracker_silence: chrono::Duration::milliseconds((TRACKER_SILENCE_SECS * 1000.0) as i64),
            snapshot_padding: SNAPSHOT_PADDING_PX,
            snapshot_quality: self.snapshot_quality,
            required_ppe: self.required_ppe.clone(),
        }
    }

    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.session_poll_interval)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_grace_seconds)
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.detector_timeout)
    }
}

/// Per-stream settings
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub frame_size: FrameSize,
    /// Frames per second forwarded for processing
    pub fps: u32,
    /// Rate the source is read at
    pub native_read_rate: u32,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl StreamConfig {
    /// Forward every n-th read frame: `floor(native_rate / fps)`, at least 1
    pub fn frame_stride(&self) -> u64 {
        (self.native_read_rate / self.fps.max(1)).max(1) as u64
    }

    /// Pause between reads
    pub fn read_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.native_read_rate.max(1) as f64)
    }

    /// Pause between static image iterations
    pub fn process_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        AppConfig::default().stream_config()
    }
}

/// Violation engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub iou_threshold: f64,
    pub debounce: chrono::Duration,
    pub cooldown: chrono::Duration,
    pub tracker_silence: chrono::Duration,
    pub snapshot_padding: u32,
    pub snapshot_quality: u8,
    pub required_ppe: RequiredPpe,
}

impl Default for EngineConfig {
    fn default() -> Self {
        AppConfig::default().engine_config()
    }
}

/// Parse `id:source,id:source` (the source may itself contain colons)
pub fn parse_camera_sources(raw: &str) -> Result<Vec<CameraSource>> {
    let mut cameras = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once(':') {
            Some((id, source)) if !id.trim().is_empty() && !source.trim().is_empty() => {
                cameras.push(CameraSource::new(id.trim(), source.trim()));
            }
            _ => {
                return Err(Error::Config(format!(
                    "invalid CAMERA_SOURCES entry '{}', expected id:source",
                    entry
                )));
            }
        }
    }
    Ok(cameras)
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        None => default,
    }
}

fn parse_num<T>(name: &str, value: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .parse()
            .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", name, v, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.cameras, vec![CameraSource::new("camera_0", "0")]);
        assert_eq!(config.fps, 10);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert!(config.required_ppe.is_required(PpeKind::Goggles));
        assert!(!config.required_ppe.is_required(PpeKind::Gloves));
    }

    #[test]
    fn test_camera_sources_keep_url_colons() {
        let cameras =
            parse_camera_sources("cam1:rtsp://10.0.0.5:554/stream, cam2:0 ,cam3:/data/lab.mp4").unwrap();
        assert_eq!(cameras.len(), 3);
        assert_eq!(cameras[0].source, "rtsp://10.0.0.5:554/stream");
        assert_eq!(cameras[1].source, "0");
        assert_eq!(cameras[2].id, "cam3");
    }

    #[test]
    fn test_invalid_camera_entry() {
        assert!(parse_camera_sources("no-separator").is_err());
    }

    #[test]
    fn test_duplicate_camera_ids_rejected() {
        let result = AppConfig::from_lookup(lookup(&[("CAMERA_SOURCES", "a:0,a:1")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("FPS", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("FPS", "ten")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("IOU_THRESHOLD", "1.5")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("SNAPSHOT_QUALITY", "0")])).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("FPS", "5"),
            ("REQUIRE_GLOVES", "TRUE"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("VIOLATION_DEBOUNCE_SECONDS", "1.5"),
        ]))
        .unwrap();
        assert_eq!(config.fps, 5);
        assert!(config.required_ppe.is_required(PpeKind::Gloves));
        assert_eq!(config.supabase_key.as_deref(), Some("anon"));
        assert_eq!(config.engine_config().debounce, chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn test_frame_stride() {
        let mut stream = StreamConfig::default();
        assert_eq!(stream.frame_stride(), 3);
        stream.fps = 7;
        assert_eq!(stream.frame_stride(), 4);
        stream.fps = 60;
        assert_eq!(stream.frame_stride(), 1);
    }
}
