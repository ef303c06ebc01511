//! Configuration model
//!
//! Loaded from YAML or JSON (by file extension), unknown keys rejected.
//! Validation collects every field error before reporting so a broken file
//! is diagnosed in one pass.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EdgeError, Result};

/// FFmpeg arguments applied to every camera unless overridden.
pub const DEFAULT_GLOBAL_ARGS: &[&str] = &["-hide_banner", "-loglevel", "warning", "-threads", "2"];
/// Raw yuv420p on stdout, always.
pub const DEFAULT_OUTPUT_ARGS: &[&str] = &["-threads", "2", "-f", "rawvideo", "-pix_fmt", "yuv420p"];

/// Top-level configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub database: DatabaseConfig,
    pub cameras: BTreeMap<String, CameraConfig>,
    pub model: ModelConfig,
}

/// MQTT broker settings. Publishing is delegated to an external sink; the
/// record is parsed and validated here so a broken deployment fails early.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
    pub client_id: String,
    pub user: String,
    pub password: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 1883,
            topic_prefix: "edge".to_string(),
            client_id: "edge-0".to_string(),
            user: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Per-camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CameraConfig {
    pub enabled: bool,
    pub best_image_timeout: u64,
    pub source: SourceConfig,
    pub detect: DetectConfig,
    pub motion: MotionConfig,
    pub mqtt: MqttConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            best_image_timeout: 30,
            source: SourceConfig::default(),
            detect: DetectConfig::default(),
            motion: MotionConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl CameraConfig {
    /// Native luminance plane shape `(height, width)`.
    pub fn frame_shape(&self) -> (u32, u32) {
        (self.detect.height, self.detect.width)
    }

    /// Full yuv420 buffer shape `(height * 3/2, width)`.
    pub fn frame_shape_yuv(&self) -> (u32, u32) {
        (self.detect.height * 3 / 2, self.detect.width)
    }

    /// Bytes per raw yuv420 frame on the decoder pipe.
    pub fn frame_size(&self) -> usize {
        self.detect.width as usize * self.detect.height as usize * 3 / 2
    }
}

/// Stream input: a path plus the decoder invocation parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SourceConfig {
    pub path: String,
    pub ffmpeg: FfmpegConfig,
}

/// Decoder invocation parameters. `input_args` and `hwaccel_args` accept
/// either a preset name or explicit arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FfmpegConfig {
    pub global_args: Args,
    pub hwaccel_args: Args,
    pub input_args: Args,
    pub output_args: Args,
    /// Seconds between watchdog passes and decoder restart attempts.
    pub retry_interval: f64,
    /// Capture rate treated as a runaway decoder by the watchdog.
    pub runaway_fps: f64,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            global_args: Args::default(),
            hwaccel_args: Args::default(),
            input_args: Args::default(),
            output_args: Args::default(),
            retry_interval: 5.0,
            runaway_fps: 40.0,
        }
    }
}

/// A command-line fragment: one string that is split on whitespace, or an
/// explicit argument list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Args {
    Line(String),
    List(Vec<String>),
}

impl Default for Args {
    fn default() -> Self {
        Args::Line(String::new())
    }
}

impl Args {
    pub fn is_empty(&self) -> bool {
        match self {
            Args::Line(s) => s.trim().is_empty(),
            Args::List(v) => v.is_empty(),
        }
    }

    /// The fragment as a single token when it names a preset.
    pub fn as_preset(&self) -> Option<&str> {
        match self {
            Args::Line(s) => {
                let s = s.trim();
                (!s.is_empty() && !s.contains(char::is_whitespace)).then_some(s)
            }
            Args::List(_) => None,
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        match self {
            Args::Line(s) => s.split_whitespace().map(str::to_string).collect(),
            Args::List(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DetectConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub min_initialized: u32,
    pub max_disappeared: u32,
    pub stationary: StationaryConfig,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 320,
            fps: 10,
            min_initialized: 10,
            max_disappeared: 10,
            stationary: StationaryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StationaryConfig {
    /// Frame interval for re-checking stationary objects; 0 disables the
    /// periodic re-submission.
    pub interval: u32,
    pub threshold: u32,
    pub max_frames: u32,
}

impl Default for StationaryConfig {
    fn default() -> Self {
        Self {
            interval: 0,
            threshold: 1,
            max_frames: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MotionConfig {
    pub enabled: bool,
    /// Pixel delta treated as motion, 1..=255.
    pub threshold: u8,
    /// Motion fraction above which the frame is a global illumination
    /// change, 0.3..=1.0.
    pub lightning_threshold: f64,
    pub improve_contrast: bool,
    pub contour_area: u32,
    /// Averaging weight while calibrating.
    pub delta_alpha: f64,
    /// Averaging weight once calibrated.
    pub frame_alpha: f64,
    /// Height of the downscaled motion frame.
    pub frame_height: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 30,
            lightning_threshold: 0.8,
            improve_contrast: true,
            contour_area: 10,
            delta_alpha: 0.2,
            frame_alpha: 0.01,
            frame_height: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputTensor {
    Nchw,
    Nhwc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb,
    Bgr,
    Yuv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Ssd,
    Yolox,
    Yolov5,
    Yolov8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ModelConfig {
    pub path: Option<String>,
    pub width: u32,
    pub height: u32,
    pub input_tensor: InputTensor,
    pub input_pixel_format: PixelFormat,
    pub model_type: ModelType,
    pub labelmap: BTreeMap<u32, String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            width: 320,
            height: 320,
            input_tensor: InputTensor::Nhwc,
            input_pixel_format: PixelFormat::Rgb,
            model_type: ModelType::Yolov8,
            labelmap: BTreeMap::new(),
        }
    }
}

impl ModelConfig {
    pub fn label(&self, class_id: u32) -> Option<&str> {
        self.labelmap.get(&class_id).map(String::as_str)
    }
}

impl AppConfig {
    /// Loads and validates a configuration file. The format is chosen by
    /// extension: `.json` is JSON, anything else is YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EdgeError::Config(format!("failed to read {}: {e}", path.display())))?;

        let config: AppConfig = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&raw)
                .map_err(|e| EdgeError::Config(format!("failed to parse {}: {e}", path.display())))?
        } else {
            serde_yaml::from_str(&raw)
                .map_err(|e| EdgeError::Config(format!("failed to parse {}: {e}", path.display())))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates every field, collecting all diagnostics.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        validate_mqtt("mqtt", &self.mqtt, &mut errors);

        for (name, camera) in &self.cameras {
            // Camera names become shared-memory segment names.
            if name.is_empty() || name.contains('/') || name.contains(char::is_whitespace) {
                errors.push(format!(
                    "cameras.{name}: name must be non-empty without '/' or whitespace"
                ));
            }
            camera.validate(name, &mut errors);
        }

        if self.model.width == 0 || self.model.height == 0 {
            errors.push("model.width/height: must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EdgeError::Validation(errors))
        }
    }
}

impl CameraConfig {
    fn validate(&self, name: &str, errors: &mut Vec<String>) {
        if self.source.path.is_empty() {
            errors.push(format!("cameras.{name}.source.path: must not be empty"));
        }
        if self.detect.width == 0 || self.detect.height == 0 {
            errors.push(format!("cameras.{name}.detect.width/height: must be non-zero"));
        }
        // yuv420 needs even dimensions for the chroma planes.
        if self.detect.width % 2 != 0 || self.detect.height % 2 != 0 {
            errors.push(format!("cameras.{name}.detect.width/height: must be even"));
        }
        if self.detect.fps == 0 {
            errors.push(format!("cameras.{name}.detect.fps: must be non-zero"));
        }
        if self.motion.threshold < 1 {
            errors.push(format!("cameras.{name}.motion.threshold: must be between 1 and 255"));
        }
        if !(0.3..=1.0).contains(&self.motion.lightning_threshold) {
            errors.push(format!(
                "cameras.{name}.motion.lightning_threshold: must be between 0.3 and 1.0"
            ));
        }
        if self.motion.frame_height == 0 {
            errors.push(format!("cameras.{name}.motion.frame_height: must be non-zero"));
        }
        if self.source.ffmpeg.retry_interval <= 0.0 {
            errors.push(format!("cameras.{name}.source.ffmpeg.retry_interval: must be positive"));
        }
        if self.source.ffmpeg.runaway_fps <= 0.0 {
            errors.push(format!("cameras.{name}.source.ffmpeg.runaway_fps: must be positive"));
        }
        validate_mqtt(&format!("cameras.{name}.mqtt"), &self.mqtt, errors);
    }
}

fn validate_mqtt(prefix: &str, mqtt: &MqttConfig, errors: &mut Vec<String>) {
    if !mqtt.password.is_empty() && mqtt.user.is_empty() {
        errors.push(format!("{prefix}.password: password must be provided with a username"));
    }
    if mqtt.enabled && mqtt.host.is_empty() {
        errors.push(format!("{prefix}.host: must not be empty when mqtt is enabled"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, contents: &str) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new()
            .suffix(name)
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.into_temp_path()
    }

    #[test]
    fn minimal_yaml_gets_defaults() {
        let path = write_config(
            ".yaml",
            r#"
cameras:
  front:
    source:
      path: rtsp://example/stream
"#,
        );
        let config = AppConfig::load(&path).unwrap();
        let camera = &config.cameras["front"];
        assert!(camera.enabled);
        assert_eq!(camera.detect.width, 320);
        assert_eq!(camera.detect.height, 320);
        assert_eq!(camera.detect.fps, 10);
        assert_eq!(camera.motion.threshold, 30);
        assert_eq!(camera.motion.lightning_threshold, 0.8);
        assert_eq!(camera.motion.contour_area, 10);
        assert_eq!(camera.motion.frame_alpha, 0.01);
        assert_eq!(camera.motion.frame_height, 100);
        assert_eq!(camera.detect.stationary.interval, 0);
        assert_eq!(camera.detect.stationary.threshold, 1);
        assert_eq!(camera.detect.stationary.max_frames, 1);
        assert_eq!(config.model.model_type, ModelType::Yolov8);
        assert_eq!(config.model.input_tensor, InputTensor::Nhwc);
        assert_eq!(config.model.input_pixel_format, PixelFormat::Rgb);
        assert_eq!(camera.frame_size(), 320 * 320 * 3 / 2);
        assert_eq!(camera.frame_shape_yuv(), (480, 320));
    }

    #[test]
    fn json_is_accepted() {
        let path = write_config(
            ".json",
            r#"{"cameras": {"front": {"source": {"path": "clip.mp4"}}}}"#,
        );
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.cameras["front"].source.path, "clip.mp4");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let path = write_config(
            ".yaml",
            r#"
cameras:
  front:
    source:
      path: rtsp://example/stream
    recording: true
"#,
        );
        assert!(matches!(AppConfig::load(&path), Err(EdgeError::Config(_))));
    }

    #[test]
    fn validation_collects_all_diagnostics() {
        let mut config = AppConfig::default();
        let mut camera = CameraConfig::default();
        camera.motion.threshold = 0;
        camera.motion.lightning_threshold = 0.1;
        camera.source.ffmpeg.retry_interval = 0.0;
        config.cameras.insert("front".to_string(), camera);

        match config.validate() {
            Err(EdgeError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("source.path")));
                assert!(errors.iter().any(|e| e.contains("motion.threshold")));
                assert!(errors.iter().any(|e| e.contains("lightning_threshold")));
                assert!(errors.iter().any(|e| e.contains("retry_interval")));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn mqtt_password_requires_user() {
        let mut config = AppConfig::default();
        config.mqtt.password = "secret".to_string();
        match config.validate() {
            Err(EdgeError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("mqtt.password")));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn args_accept_string_or_list() {
        let line = Args::Line("-threads 2".to_string());
        assert_eq!(line.to_args(), vec!["-threads", "2"]);
        assert_eq!(line.as_preset(), None);

        let preset = Args::Line("rtsp-generic".to_string());
        assert_eq!(preset.as_preset(), Some("rtsp-generic"));

        let list = Args::List(vec!["-f".to_string(), "lavfi".to_string()]);
        assert_eq!(list.to_args(), vec!["-f", "lavfi"]);
        assert_eq!(list.as_preset(), None);
    }
}
