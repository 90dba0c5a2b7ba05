//! Project constants.

use std::time::Duration;

/// Path to the configuration file.
pub const CONFIG_FILE_PATH: &str = "/home/kiosk/data/config.json";

/// Directory where selected capture frames are persisted.
pub const DEFAULT_CAPTURES_DIR: &str = "/home/kiosk/data/captures";

/// Default listen address for the admin HTTP surface.
pub const DEFAULT_ADMIN_ADDR: &str = "127.0.0.1:8900";

/// Sysfs node of the proximity sensor driver.
pub const PROXIMITY_SYSFS_PATH: &str =
    "/sys/bus/iio/devices/iio:device0/in_distance_raw";

/// Near/far distance boundary in millimeters. A sample at exactly the
/// threshold classifies as near.
pub const PROXIMITY_THRESHOLD_MM: u16 = 500;

/// Hysteresis window for proximity classification changes.
pub const PROXIMITY_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Proximity sensor sample rate.
pub const PROXIMITY_POLL_HZ: u32 = 10;

/// Consecutive proximity read failures before the health callback fires.
pub const PROXIMITY_FAILURE_SIGNAL_COUNT: u32 = 3;

/// Cap for the proximity read-failure backoff.
pub const PROXIMITY_BACKOFF_CAP: Duration = Duration::from_secs(1);

/// Mean face depth below this is rejected as too close.
pub const DISTANCE_MIN_M: f64 = 0.25;

/// Mean face depth above this is rejected as too far.
pub const DISTANCE_MAX_M: f64 = 1.20;

/// Depth standard deviation below this is rejected as a flat surface.
pub const DEPTH_VARIANCE_MIN_M: f64 = 0.015;

/// Minimum count of valid depth points inside the face bounding box.
pub const MIN_VALID_DEPTH_POINTS: u32 = 100;

/// Publish an encoded preview frame every N-th processed frame.
pub const PREVIEW_FRAME_SKIP: u32 = 4;

/// Color/depth stream width.
pub const CAMERA_WIDTH: u32 = 640;

/// Color/depth stream height.
pub const CAMERA_HEIGHT: u32 = 480;

/// Camera frame rate.
pub const CAMERA_FPS: u32 = 30;

/// Timeout for a single aligned frame pair.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Consecutive frame timeouts before the pipeline is restarted in place.
pub const RESTART_AFTER_TIMEOUTS: u32 = 8;

/// Consecutive processing failures before the pipeline is restarted.
pub const RESTART_AFTER_FAILURES: u32 = 5;

/// Bounded queue capacity of a frame-result subscription.
pub const RESULT_QUEUE_CAPACITY: usize = 50;

/// Bounded queue capacity of a preview subscription.
pub const PREVIEW_QUEUE_CAPACITY: usize = 2;

/// Bounded queue capacity of a presentation event subscription.
pub const EVENT_QUEUE_CAPACITY: usize = 50;

/// Bounded capacity of the controller command queue.
pub const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Bounded capacity of the per-session inbound bridge message queue.
pub const BRIDGE_INBOUND_CAPACITY: usize = 16;

/// Presentation heartbeat interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum display time of the pairing-request phase.
pub const PAIRING_MIN_DISPLAY: Duration = Duration::from_millis(1500);

/// Fixed display time of the hello-human phase.
pub const HELLO_HUMAN_DISPLAY: Duration = Duration::from_millis(2000);

/// Fixed display time of the scan-prompt phase.
pub const SCAN_PROMPT_DISPLAY: Duration = Duration::from_millis(3000);

/// Length of the liveness validation window.
pub const VALIDATION_WINDOW: Duration = Duration::from_millis(3500);

/// Passing frames required for a session to leave validation.
pub const MIN_PASSING_FRAMES: usize = 10;

/// Camera warm-up after a cold activation.
pub const WARMUP_COLD: Duration = Duration::from_millis(2000);

/// Camera warm-up when the pipeline was already running.
pub const WARMUP_WARM: Duration = Duration::from_millis(500);

/// Weight of temporal bbox stability in the composite frame score.
pub const STABILITY_WEIGHT: f64 = 0.7;

/// Weight of per-frame focus in the composite frame score.
pub const FOCUS_WEIGHT: f64 = 0.3;

/// Variance-of-Laplacian value that normalizes to a focus score of 1.
pub const FOCUS_NORM_THRESHOLD: f64 = 800.0;

/// Half-life of the bbox centroid motion average used for stability.
pub const STABILITY_HALF_LIFE: Duration = Duration::from_millis(400);

/// Minimum display time of the processing phase.
pub const PROCESSING_MIN_DISPLAY: Duration = Duration::from_millis(3000);

/// Maximum wait for the backend acknowledgement.
pub const PROCESSING_MAX_WAIT: Duration = Duration::from_millis(15000);

/// Display time of the complete phase.
pub const COMPLETE_DISPLAY: Duration = Duration::from_millis(3000);

/// Display time of the error phase.
pub const ERROR_DISPLAY: Duration = Duration::from_millis(3000);

/// HTTP client to the bridge backend: request timeout.
pub const BRIDGE_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client to the bridge backend: connect timeout.
pub const BRIDGE_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// JPEG quality of the persisted and uploaded best frame.
pub const JPEG_QUALITY_CAPTURE: u8 = 95;

/// JPEG quality of preview frames.
pub const JPEG_QUALITY_PREVIEW: u8 = 70;

/// Camera source tag held during the validation phase.
pub const CAMERA_TAG_VALIDATION: &str = "validation";

/// Camera source tag held while the preview toggle is on.
pub const CAMERA_TAG_PREVIEW: &str = "preview";
