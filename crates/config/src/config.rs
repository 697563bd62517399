//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Seconds in one day; delays are configured in days.
pub const SECS_PER_DAY: f64 = 86_400.0;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Directory layout shared by both pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PathsConfig {
    /// Directories the remux stage watches for `.flv` recordings
    #[serde(default)]
    pub flv_dirs: Vec<PathBuf>,
    /// Remux destination, watched by the transcode stage
    #[serde(default)]
    pub remux_dir: PathBuf,
    /// Transcode destination (long-term storage)
    #[serde(default)]
    pub save_dir: PathBuf,
    /// Working directory for in-progress conversion output
    #[serde(default)]
    pub cache_dir: PathBuf,
}

/// Remux stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemuxConfig {
    /// Days a recording must be unmodified before it is remuxed
    #[serde(default)]
    pub days_before_remux: f64,
    /// Recordings smaller than this are discarded (0 disables)
    #[serde(default)]
    pub min_bytes: u64,
    /// Recordings shorter than this are discarded (0 disables)
    #[serde(default)]
    pub min_duration_secs: f64,
    /// Skip recordings whose sidecar file is missing
    #[serde(default)]
    pub require_sidecar: bool,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            days_before_remux: 0.0,
            min_bytes: 0,
            min_duration_secs: 0.0,
            require_sidecar: false,
        }
    }
}

/// Transcode stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    /// Days a remuxed file must be unmodified before it is transcoded
    #[serde(default = "default_days_before_transcode")]
    pub days_before_transcode: f64,
    /// Codec name the transcoded output must probe as
    #[serde(default = "default_target_codec")]
    pub target_codec: String,
    /// ffmpeg encoder producing `target_codec`
    #[serde(default = "default_encoder")]
    pub encoder: String,
    /// Constant quality passed to the encoder
    #[serde(default = "default_constant_quality")]
    pub constant_quality: u32,
    /// Keep the source bytes when transcoding saves no space
    #[serde(default = "default_keep_source_if_larger")]
    pub keep_source_if_larger: bool,
}

fn default_days_before_transcode() -> f64 {
    7.0
}

fn default_target_codec() -> String {
    "av1".to_string()
}

fn default_encoder() -> String {
    "av1_nvenc".to_string()
}

fn default_constant_quality() -> u32 {
    32
}

fn default_keep_source_if_larger() -> bool {
    true
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            days_before_transcode: default_days_before_transcode(),
            target_codec: default_target_codec(),
            encoder: default_encoder(),
            constant_quality: default_constant_quality(),
            keep_source_if_larger: default_keep_source_if_larger(),
        }
    }
}

/// Scan scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Seconds between the end of one cycle and the start of the next
    #[serde(default = "default_wakeup_secs")]
    pub wakeup_secs: f64,
}

fn default_wakeup_secs() -> f64 {
    60.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            wakeup_secs: default_wakeup_secs(),
        }
    }
}

/// External media tool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// ffmpeg binary
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    /// ffprobe binary
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    /// Hard limit for a single probe (0 disables)
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Hard limit for a single conversion (0 disables)
    #[serde(default = "default_convert_timeout_secs")]
    pub convert_timeout_secs: u64,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_probe_timeout_secs() -> u64 {
    60
}

fn default_convert_timeout_secs() -> u64 {
    86_400
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            probe_timeout_secs: default_probe_timeout_secs(),
            convert_timeout_secs: default_convert_timeout_secs(),
        }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingConfig {
    /// Optional plain-text log file in addition to the console
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Capture-timestamp renaming of remuxed recordings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CaptureTimestampConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Offset of the timezone the file names are written in
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub remux: RemuxConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub capture_timestamp: CaptureTimestampConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - FLV_DIRS -> paths.flv_dirs (comma separated)
    /// - REMUX_DIR / SAVE_DIR / CACHE_DIR -> paths.*
    /// - DAYS_BEFORE_REMUX -> remux.days_before_remux
    /// - DAYS_BEFORE_TRANSCODE -> transcode.days_before_transcode
    /// - WAKEUP_TIME -> scheduler.wakeup_secs
    /// - CONSTANT_QUALITY -> transcode.constant_quality
    /// - TARGET_CODEC -> transcode.target_codec
    /// - VIDEO_ENCODER -> transcode.encoder
    /// - LOG_FILE -> logging.log_file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("FLV_DIRS") {
            self.paths.flv_dirs = parse_dir_list(&val);
        }

        if let Ok(val) = env::var("REMUX_DIR") {
            self.paths.remux_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("SAVE_DIR") {
            self.paths.save_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("CACHE_DIR") {
            self.paths.cache_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("DAYS_BEFORE_REMUX") {
            if let Ok(days) = val.trim().parse::<f64>() {
                self.remux.days_before_remux = days;
            }
        }

        if let Ok(val) = env::var("DAYS_BEFORE_TRANSCODE") {
            if let Ok(days) = val.trim().parse::<f64>() {
                self.transcode.days_before_transcode = days;
            }
        }

        if let Ok(val) = env::var("WAKEUP_TIME") {
            if let Ok(secs) = val.trim().parse::<f64>() {
                self.scheduler.wakeup_secs = secs;
            }
        }

        if let Ok(val) = env::var("CONSTANT_QUALITY") {
            if let Ok(cq) = val.trim().parse::<u32>() {
                self.transcode.constant_quality = cq;
            }
        }

        if let Ok(val) = env::var("TARGET_CODEC") {
            self.transcode.target_codec = val;
        }
        if let Ok(val) = env::var("VIDEO_ENCODER") {
            self.transcode.encoder = val;
        }

        if let Ok(val) = env::var("LOG_FILE") {
            self.logging.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Build configuration from defaults and environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Check that the configuration is complete and consistent.
    ///
    /// Must pass before any scan cycle runs; the daemon never re-validates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths = &self.paths;

        if paths.flv_dirs.is_empty() {
            return Err(ConfigError::Invalid("FLV_DIRS is not set".to_string()));
        }
        for dir in &paths.flv_dirs {
            require_dir("FLV_DIRS", dir)?;
        }
        require_dir("REMUX_DIR", &paths.remux_dir)?;
        require_dir("SAVE_DIR", &paths.save_dir)?;
        require_dir("CACHE_DIR", &paths.cache_dir)?;

        check_disjoint_trees(paths)?;

        require_non_negative("DAYS_BEFORE_REMUX", self.remux.days_before_remux)?;
        require_non_negative("DAYS_BEFORE_TRANSCODE", self.transcode.days_before_transcode)?;
        require_non_negative("remux.min_duration_secs", self.remux.min_duration_secs)?;
        require_non_negative("WAKEUP_TIME", self.scheduler.wakeup_secs)?;

        if self.transcode.target_codec.trim().is_empty() {
            return Err(ConfigError::Invalid("TARGET_CODEC is empty".to_string()));
        }
        if self.transcode.encoder.trim().is_empty() {
            return Err(ConfigError::Invalid("VIDEO_ENCODER is empty".to_string()));
        }
        if self.capture_timestamp.utc_offset_minutes.unsigned_abs() >= MINUTES_PER_DAY {
            return Err(ConfigError::Invalid(format!(
                "capture_timestamp.utc_offset_minutes={} must be within one day",
                self.capture_timestamp.utc_offset_minutes
            )));
        }

        Ok(())
    }
}

/// Split a comma separated directory list, ignoring empty entries
pub fn parse_dir_list(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn require_dir(name: &str, dir: &Path) -> Result<(), ConfigError> {
    if dir.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(format!("{} is not set", name)));
    }
    if !dir.is_dir() {
        return Err(ConfigError::Invalid(format!(
            "{}={} directory does not exist",
            name,
            dir.display()
        )));
    }
    Ok(())
}

/// Reject any stage directory equal to or nested inside another.
///
/// Scans are recursive, so a nested destination or working directory would
/// be rediscovered as input by the stage watching its parent.
fn check_disjoint_trees(paths: &PathsConfig) -> Result<(), ConfigError> {
    let mut roles = Vec::with_capacity(paths.flv_dirs.len() + 3);
    for dir in &paths.flv_dirs {
        roles.push(("FLV_DIRS", dir.canonicalize()?));
    }
    roles.push(("REMUX_DIR", paths.remux_dir.canonicalize()?));
    roles.push(("SAVE_DIR", paths.save_dir.canonicalize()?));
    roles.push(("CACHE_DIR", paths.cache_dir.canonicalize()?));

    for (i, (name_a, a)) in roles.iter().enumerate() {
        for (name_b, b) in &roles[i + 1..] {
            // Several FLV_DIRS entries may share a tree; they feed the same stage
            if *name_a == "FLV_DIRS" && *name_b == "FLV_DIRS" {
                continue;
            }
            if a.starts_with(b) || b.starts_with(a) {
                return Err(ConfigError::Invalid(format!(
                    "{}={} and {}={} overlap; stage directories must be disjoint trees",
                    name_a,
                    a.display(),
                    name_b,
                    b.display()
                )));
            }
        }
    }
    Ok(())
}

fn require_non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{}={} must be greater or equal to 0",
            name, value
        )));
    }
    Ok(())
}
