//! Configuration for the camlink binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use camlink_core::{DEFAULT_PORT, MAX_PAYLOAD_SIZE, PixelFormat, SessionSettings, StreamConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Device name that selects the built-in test pattern instead of a camera.
pub const SYNTHETIC_DEVICE: &str = "synthetic";

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CamlinkConfig {
    /// Where to listen and where to connect.
    pub network: NetworkConfig,
    /// Camera and stream geometry.
    pub capture: CaptureConfig,
    /// What the consumer does with received frames.
    pub output: OutputConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Producer address the consumer connects to.
    pub address: String,
    /// Interface the producer binds.
    pub listen: String,
    /// TCP port shared by both roles.
    pub port: u16,
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// V4L2 node such as `/dev/video0`, or `"synthetic"`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// FourCC of the pixel layout: "YUYV", "UYVY", "RGB3", "BGR3", "GREY".
    pub pixel_format: PixelFormat,
    /// Buffers cycled between device and reader.
    pub slots: usize,
    /// Sleep between polls of a busy device, in milliseconds.
    pub backoff_ms: u64,
    /// Frame rate of the synthetic device. 0 produces frames as fast as
    /// they are read.
    pub synthetic_fps: u32,
}

/// Where received frames go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Count frames and log the rate.
    #[default]
    Stats,
    /// Append raw frame bytes to `output.path` (stdout when empty).
    Raw,
}

/// Consumer output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub renderer: RendererKind,
    /// Target file for the raw renderer. Empty writes to stdout.
    pub path: String,
    /// Seconds between rate reports of the stats renderer.
    pub report_interval_secs: u64,
    /// Stop after this many frames (0 = unlimited). On the producer this
    /// caps every session.
    pub max_frames: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            listen: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let stream = StreamConfig::default();
        Self {
            device: "/dev/video0".into(),
            width: stream.width,
            height: stream.height,
            pixel_format: stream.format,
            slots: camlink_core::capture::DEFAULT_SLOTS,
            backoff_ms: 2,
            synthetic_fps: 30,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            renderer: RendererKind::Stats,
            path: String::new(),
            report_interval_secs: 5,
            max_frames: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Command-line overrides ───────────────────────────────────────

/// Values given on the command line. `None` keeps the file's setting.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_format: Option<PixelFormat>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub device: Option<String>,
    pub output: Option<PathBuf>,
    pub frames: Option<u64>,
    pub verbose: bool,
}

// ── Loading ──────────────────────────────────────────────────────

/// Where the settings returned by [`CamlinkConfig::load`] came from.
///
/// Loading happens before logging is set up, so the outcome is reported
/// afterwards through [`ConfigSource::log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from the file.
    File(PathBuf),
    /// No readable file; defaults.
    Missing(PathBuf),
    /// The file did not parse; defaults.
    Invalid { path: PathBuf, reason: String },
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("loaded config from {}", path.display()),
            ConfigSource::Missing(path) => info!("no config at {}; using defaults", path.display()),
            ConfigSource::Invalid { path, reason } => {
                warn!("invalid config {}: {reason}; using defaults", path.display())
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        !matches!(self, ConfigSource::File(_))
    }
}

impl CamlinkConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> (Self, ConfigSource) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
                Err(e) => (
                    Self::default(),
                    ConfigSource::Invalid {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    },
                ),
            },
            Err(_) => (Self::default(), ConfigSource::Missing(path.to_path_buf())),
        }
    }

    /// Reject settings no session could run with.
    pub fn validate(&self) -> Result<(), String> {
        let stream = self.stream_config();
        if stream.width == 0 || stream.height == 0 {
            return Err(format!("frame size {stream} has a zero dimension"));
        }
        match stream.checked_frame_len() {
            Some(len) if len as u64 <= MAX_PAYLOAD_SIZE => Ok(()),
            _ => Err(format!(
                "frames of {stream} exceed the {MAX_PAYLOAD_SIZE}-byte package limit"
            )),
        }
    }

    /// Layer command-line values over the loaded file.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(width) = overrides.width {
            self.capture.width = width;
        }
        if let Some(height) = overrides.height {
            self.capture.height = height;
        }
        if let Some(format) = overrides.pixel_format {
            self.capture.pixel_format = format;
        }
        if let Some(address) = &overrides.address {
            self.network.address = address.clone();
        }
        if let Some(port) = overrides.port {
            self.network.port = port;
        }
        if let Some(device) = &overrides.device {
            self.capture.device = device.clone();
        }
        if let Some(output) = &overrides.output {
            self.output.renderer = RendererKind::Raw;
            self.output.path = output.display().to_string();
        }
        if let Some(frames) = overrides.frames {
            self.output.max_frames = frames;
        }
        if overrides.verbose {
            self.logging.level = "debug".into();
        }
    }

    /// The stream every session requests or captures.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig::new(
            self.capture.width,
            self.capture.height,
            self.capture.pixel_format,
        )
    }

    /// Per-session capture settings for the producer.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            slots: self.capture.slots.max(1),
            backoff: self.backoff(),
            frame_limit: self.frame_limit(),
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.capture.backoff_ms.max(1))
    }

    /// `max_frames` as an optional limit.
    pub fn frame_limit(&self) -> Option<u64> {
        (self.output.max_frames > 0).then_some(self.output.max_frames)
    }

    /// `true` when the configured device is the built-in test pattern.
    pub fn is_synthetic(&self) -> bool {
        self.capture.device.eq_ignore_ascii_case(SYNTHETIC_DEVICE)
    }
}

// ── Tests ────────────────────────────────────────────────────────
