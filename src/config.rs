//! Kiosk configuration settings.

use crate::consts::{
    BRIDGE_HTTP_TIMEOUT, CAMERA_FPS, CAMERA_HEIGHT, CAMERA_WIDTH, COMPLETE_DISPLAY,
    DEFAULT_ADMIN_ADDR, DEFAULT_CAPTURES_DIR, DEPTH_VARIANCE_MIN_M, DISTANCE_MAX_M,
    DISTANCE_MIN_M, ERROR_DISPLAY, FOCUS_NORM_THRESHOLD, FOCUS_WEIGHT, MIN_PASSING_FRAMES,
    MIN_VALID_DEPTH_POINTS, PREVIEW_FRAME_SKIP, PROCESSING_MAX_WAIT, PROCESSING_MIN_DISPLAY,
    PROXIMITY_DEBOUNCE, PROXIMITY_POLL_HZ, PROXIMITY_THRESHOLD_MM, STABILITY_WEIGHT,
    VALIDATION_WINDOW, WARMUP_COLD, WARMUP_WARM,
};
use eyre::{ensure, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio::fs;

/// Proximity sensor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Near/far boundary in millimeters (inclusive on the near side).
    pub threshold_mm: u16,
    /// Hysteresis window in milliseconds.
    pub debounce_ms: u64,
    /// Sample rate in Hz.
    pub poll_hz: u32,
}

/// Depth camera and liveness thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Below this mean depth the verdict is `too_close`.
    pub distance_min_m: f64,
    /// Above this mean depth the verdict is `too_far`.
    pub distance_max_m: f64,
    /// Below this depth standard deviation the verdict is `flat_surface`.
    pub depth_variance_min_m: f64,
    /// Below this count of valid depth points the verdict is
    /// `insufficient_depth_data`.
    pub min_valid_points: u32,
    /// Publish every N-th frame on the preview channel.
    pub preview_frame_skip: u32,
    /// Stream resolution.
    pub resolution: Resolution,
    /// Stream frame rate.
    pub fps: u32,
}

/// Color/depth stream resolution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
}

/// Validation-phase settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Length of the collection window in seconds.
    pub duration_s: f64,
    /// Passing frames required for the session to proceed.
    pub min_passing_frames: usize,
    /// Warm-up after a cold camera activation, in milliseconds.
    pub warmup_cold_ms: u64,
    /// Warm-up when the camera was already active, in milliseconds.
    pub warmup_warm_ms: u64,
    /// Weight of bbox stability in the composite score.
    pub stability_weight: f64,
    /// Weight of focus in the composite score.
    pub focus_weight: f64,
    /// Variance-of-Laplacian value mapping to a focus score of 1.
    pub focus_norm_threshold: f64,
}

/// Processing-phase settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Minimum display time in seconds.
    pub min_display_s: f64,
    /// Maximum wait for the backend acknowledgement in seconds.
    pub max_wait_s: f64,
}

/// Complete-phase settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompleteConfig {
    /// Display time in seconds.
    pub display_s: f64,
}

/// Error-phase settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorConfig {
    /// Display time in seconds.
    pub display_s: f64,
}

/// Remote bridge settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the backend HTTP API.
    pub backend_url: String,
    /// URL of the full-duplex bridge channel.
    pub ws_url: String,
    /// Device credential sent with the auth request.
    pub api_key: String,
    /// HTTP request timeout in seconds.
    pub http_timeout_s: u64,
}

/// Kiosk configuration settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proximity sensor settings.
    pub proximity: ProximityConfig,
    /// Depth camera and liveness thresholds.
    pub camera: CameraConfig,
    /// Validation-phase settings.
    pub validation: ValidationConfig,
    /// Processing-phase settings.
    pub processing: ProcessingConfig,
    /// Complete-phase settings.
    pub complete: CompleteConfig,
    /// Error-phase settings.
    pub error: ErrorConfig,
    /// Remote bridge settings.
    pub bridge: BridgeConfig,
    /// Directory where selected capture frames are persisted.
    pub captures_dir: PathBuf,
    /// Listen address of the admin HTTP surface.
    pub admin_addr: SocketAddr,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            threshold_mm: PROXIMITY_THRESHOLD_MM,
            debounce_ms: PROXIMITY_DEBOUNCE.as_millis() as u64,
            poll_hz: PROXIMITY_POLL_HZ,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            distance_min_m: DISTANCE_MIN_M,
            distance_max_m: DISTANCE_MAX_M,
            depth_variance_min_m: DEPTH_VARIANCE_MIN_M,
            min_valid_points: MIN_VALID_DEPTH_POINTS,
            preview_frame_skip: PREVIEW_FRAME_SKIP,
            resolution: Resolution { w: CAMERA_WIDTH, h: CAMERA_HEIGHT },
            fps: CAMERA_FPS,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            duration_s: VALIDATION_WINDOW.as_secs_f64(),
            min_passing_frames: MIN_PASSING_FRAMES,
            warmup_cold_ms: WARMUP_COLD.as_millis() as u64,
            warmup_warm_ms: WARMUP_WARM.as_millis() as u64,
            stability_weight: STABILITY_WEIGHT,
            focus_weight: FOCUS_WEIGHT,
            focus_norm_threshold: FOCUS_NORM_THRESHOLD,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            min_display_s: PROCESSING_MIN_DISPLAY.as_secs_f64(),
            max_wait_s: PROCESSING_MAX_WAIT.as_secs_f64(),
        }
    }
}

impl Default for CompleteConfig {
    fn default() -> Self {
        Self { display_s: COMPLETE_DISPLAY.as_secs_f64() }
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self { display_s: ERROR_DISPLAY.as_secs_f64() }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:9000".to_owned(),
            ws_url: "ws://localhost:9000/bridge".to_owned(),
            api_key: String::new(),
            http_timeout_s: BRIDGE_HTTP_TIMEOUT.as_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proximity: ProximityConfig::default(),
            camera: CameraConfig::default(),
            validation: ValidationConfig::default(),
            processing: ProcessingConfig::default(),
            complete: CompleteConfig::default(),
            error: ErrorConfig::default(),
            bridge: BridgeConfig::default(),
            captures_dir: PathBuf::from(DEFAULT_CAPTURES_DIR),
            admin_addr: DEFAULT_ADMIN_ADDR.parse().expect("valid default address"),
        }
    }
}

impl Config {
    /// Loads the configuration from a JSON file.
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .wrap_err_with(|| format!("parsing config from {}", path.display()))
    }

    /// Validates the configuration. Startup must not proceed on failure.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.proximity.poll_hz > 0, "proximity.poll_hz must be positive");
        ensure!(self.camera.fps > 0, "camera.fps must be positive");
        ensure!(self.camera.preview_frame_skip > 0, "camera.preview_frame_skip must be positive");
        ensure!(
            self.camera.distance_min_m < self.camera.distance_max_m,
            "camera.distance_min_m must be below camera.distance_max_m"
        );
        ensure!(
            self.camera.resolution.w > 0 && self.camera.resolution.h > 0,
            "camera.resolution must be non-zero"
        );
        ensure!(self.validation.duration_s > 0.0, "validation.duration_s must be positive");
        ensure!(
            self.validation.min_passing_frames > 0,
            "validation.min_passing_frames must be positive"
        );
        ensure!(
            self.validation.stability_weight >= 0.0 && self.validation.focus_weight >= 0.0,
            "validation score weights must be non-negative"
        );
        ensure!(
            self.validation.focus_norm_threshold > 0.0,
            "validation.focus_norm_threshold must be positive"
        );
        ensure!(
            self.processing.max_wait_s >= self.processing.min_display_s,
            "processing.max_wait_s must not be below processing.min_display_s"
        );
        ensure!(!self.bridge.backend_url.is_empty(), "bridge.backend_url must be set");
        ensure!(!self.bridge.ws_url.is_empty(), "bridge.ws_url must be set");
        Ok(())
    }

    /// Proximity hysteresis window.
    #[must_use]
    pub fn proximity_debounce(&self) -> Duration {
        Duration::from_millis(self.proximity.debounce_ms)
    }

    /// Length of the validation collection window.
    #[must_use]
    pub fn validation_window(&self) -> Duration {
        Duration::from_secs_f64(self.validation.duration_s)
    }

    /// Warm-up after a cold camera activation.
    #[must_use]
    pub fn warmup_cold(&self) -> Duration {
        Duration::from_millis(self.validation.warmup_cold_ms)
    }

    /// Warm-up when the camera was already active.
    #[must_use]
    pub fn warmup_warm(&self) -> Duration {
        Duration::from_millis(self.validation.warmup_warm_ms)
    }

    /// Minimum display time of the processing phase.
    #[must_use]
    pub fn processing_min_display(&self) -> Duration {
        Duration::from_secs_f64(self.processing.min_display_s)
    }

    /// Maximum wait for the backend acknowledgement.
    #[must_use]
    pub fn processing_max_wait(&self) -> Duration {
        Duration::from_secs_f64(self.processing.max_wait_s)
    }

    /// Display time of the complete phase.
    #[must_use]
    pub fn complete_display(&self) -> Duration {
        Duration::from_secs_f64(self.complete.display_s)
    }

    /// Display time of the error phase.
    #[must_use]
    pub fn error_display(&self) -> Duration {
        Duration::from_secs_f64(self.error.display_s)
    }

    /// HTTP request timeout towards the bridge backend.
    #[must_use]
    pub fn bridge_http_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge.http_timeout_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.proximity.threshold_mm, 500);
        assert_eq!(config.proximity.debounce_ms, 1500);
        assert_eq!(config.proximity.poll_hz, 10);
        assert!((config.camera.distance_min_m - 0.25).abs() < f64::EPSILON);
        assert!((config.camera.distance_max_m - 1.20).abs() < f64::EPSILON);
        assert!((config.camera.depth_variance_min_m - 0.015).abs() < f64::EPSILON);
        assert_eq!(config.camera.min_valid_points, 100);
        assert_eq!(config.camera.preview_frame_skip, 4);
        assert_eq!(config.validation.min_passing_frames, 10);
        assert_eq!(config.validation.warmup_cold_ms, 2000);
        assert_eq!(config.validation.warmup_warm_ms, 500);
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_overrides_keep_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"proximity":{"threshold_mm":650}}"#).unwrap();
        assert_eq!(config.proximity.threshold_mm, 650);
        assert_eq!(config.proximity.poll_hz, 10);
        assert_eq!(config.camera.min_valid_points, 100);
    }

    #[test]
    fn validate_rejects_inverted_distance_range() {
        let mut config = Config::default();
        config.camera.distance_min_m = 2.0;
        assert!(config.validate().is_err());
    }
}
