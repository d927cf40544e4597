//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Disc and working-directory configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscConfig {
    /// Disc identifier passed to makemkvcon (e.g. "disc:0" or "dev:/dev/sr0")
    #[serde(default = "default_device")]
    pub device: String,
    /// Directory for extracted titles and in-progress encodes
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Directory for finished files (required at run time, usually from the CLI)
    pub output_dir: Option<PathBuf>,
    /// Upper bound for a disc scan
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
}

fn default_device() -> String {
    "disc:0".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/makemkv")
}

fn default_scan_timeout_secs() -> u64 {
    300
}

impl Default for DiscConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            temp_dir: default_temp_dir(),
            output_dir: None,
            scan_timeout_secs: default_scan_timeout_secs(),
        }
    }
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_makemkvcon")]
    pub makemkvcon: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

fn default_makemkvcon() -> String {
    "makemkvcon".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            makemkvcon: default_makemkvcon(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

/// How extraction and transcoding are scheduled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Transcode each title while the next one is being extracted
    #[default]
    Parallel,
    /// Extract everything first, then transcode everything
    Sequential,
}

impl PipelineMode {
    /// Parse a mode name, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "parallel" => Some(PipelineMode::Parallel),
            "sequential" => Some(PipelineMode::Sequential),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineMode::Parallel => write!(f, "parallel"),
            PipelineMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// Pipeline scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub mode: PipelineMode,
    /// Progress polling interval while a tool is running
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Record every makemkvcon output line in the temp directory
    #[serde(default = "default_raw_log")]
    pub raw_log: bool,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_raw_log() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            raw_log: default_raw_log(),
        }
    }
}

/// Content-type classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    /// Minimum confidence for accepting the detected content type (default 0.70)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_confidence_threshold() -> f64 {
    0.70
}

impl ClassifierConfig {
    /// Threshold clamped to [0.0, 1.0]
    pub fn effective_threshold(&self) -> f64 {
        if self.confidence_threshold.is_nan() {
            return default_confidence_threshold();
        }
        self.confidence_threshold.clamp(0.0, 1.0)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// Output naming configuration for series content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamingConfig {
    #[serde(default = "default_one")]
    pub season: u32,
    /// Episode number given to the first selected title
    #[serde(default = "default_one")]
    pub episode_start: u32,
}

fn default_one() -> u32 {
    1
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            season: default_one(),
            episode_start: default_one(),
        }
    }
}

/// Title selection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SelectionConfig {
    /// Keep every feature-length title instead of only the longest one
    #[serde(default)]
    pub include_alternate_cuts: bool,
    /// Explicit title ids; overrides automatic selection when non-empty
    #[serde(default)]
    pub titles: Vec<u32>,
}

/// Stream selection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamsConfig {
    #[serde(default = "default_include_english_subtitles")]
    pub include_english_subtitles: bool,
}

fn default_include_english_subtitles() -> bool {
    true
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            include_english_subtitles: default_include_english_subtitles(),
        }
    }
}

/// Metadata lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataConfig {
    /// Local TOML catalog of titles and episode names
    pub catalog: Option<PathBuf>,
    /// How long a loaded catalog stays valid before it is re-read
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            catalog: None,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub disc: DiscConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
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
    /// - RIPPER_DISC -> disc.device
    /// - RIPPER_TEMP_DIR -> disc.temp_dir
    /// - RIPPER_OUTPUT_DIR -> disc.output_dir
    /// - RIPPER_PIPELINE_MODE -> pipeline.mode
    /// - RIPPER_CONFIDENCE_THRESHOLD -> classifier.confidence_threshold
    /// - RIPPER_SEASON -> naming.season
    /// - RIPPER_EPISODE_START -> naming.episode_start
    /// - RIPPER_INCLUDE_SUBTITLES -> streams.include_english_subtitles
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RIPPER_DISC") {
            if !val.trim().is_empty() {
                self.disc.device = val;
            }
        }

        if let Ok(val) = env::var("RIPPER_TEMP_DIR") {
            if !val.trim().is_empty() {
                self.disc.temp_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("RIPPER_OUTPUT_DIR") {
            if !val.trim().is_empty() {
                self.disc.output_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("RIPPER_PIPELINE_MODE") {
            if let Some(mode) = PipelineMode::parse(&val) {
                self.pipeline.mode = mode;
            }
        }

        if let Ok(val) = env::var("RIPPER_CONFIDENCE_THRESHOLD") {
            if let Ok(threshold) = val.parse::<f64>() {
                self.classifier.confidence_threshold = threshold;
            }
        }

        if let Ok(val) = env::var("RIPPER_SEASON") {
            if let Ok(season) = val.parse::<u32>() {
                self.naming.season = season;
            }
        }

        if let Ok(val) = env::var("RIPPER_EPISODE_START") {
            if let Ok(start) = val.parse::<u32>() {
                self.naming.episode_start = start;
            }
        }

        if let Ok(val) = env::var("RIPPER_INCLUDE_SUBTITLES") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.streams.include_english_subtitles = true,
                "false" | "0" | "no" => self.streams.include_english_subtitles = false,
                _ => {}
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("RIPPER_DISC");
        env::remove_var("RIPPER_TEMP_DIR");
        env::remove_var("RIPPER_OUTPUT_DIR");
        env::remove_var("RIPPER_PIPELINE_MODE");
        env::remove_var("RIPPER_CONFIDENCE_THRESHOLD");
        env::remove_var("RIPPER_SEASON");
        env::remove_var("RIPPER_EPISODE_START");
        env::remove_var("RIPPER_INCLUDE_SUBTITLES");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            device in "disc:[0-9]",
            threshold in 0.0f64..1.0,
            season in 1u32..40,
            episode_start in 1u32..30,
            sequential in proptest::bool::ANY,
            alternate_cuts in proptest::bool::ANY,
            subtitles in proptest::bool::ANY,
            poll_ms in 50u64..5000,
        ) {
            let toml_str = format!(
                r#"
[disc]
device = "{}"
temp_dir = "/var/tmp/rips"
output_dir = "/media/library"

[pipeline]
mode = "{}"
poll_interval_ms = {}

[classifier]
confidence_threshold = {}

[naming]
season = {}
episode_start = {}

[selection]
include_alternate_cuts = {}
titles = [0, 3]

[streams]
include_english_subtitles = {}
"#,
                device,
                if sequential { "sequential" } else { "parallel" },
                poll_ms,
                threshold,
                season,
                episode_start,
                alternate_cuts,
                subtitles,
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(&config.disc.device, &device);
            prop_assert_eq!(&config.disc.temp_dir, &PathBuf::from("/var/tmp/rips"));
            prop_assert_eq!(config.disc.output_dir.clone(), Some(PathBuf::from("/media/library")));
            let expected_mode = if sequential { PipelineMode::Sequential } else { PipelineMode::Parallel };
            prop_assert_eq!(config.pipeline.mode, expected_mode);
            prop_assert_eq!(config.pipeline.poll_interval_ms, poll_ms);
            prop_assert!((config.classifier.confidence_threshold - threshold).abs() < 1e-9);
            prop_assert_eq!(config.naming.season, season);
            prop_assert_eq!(config.naming.episode_start, episode_start);
            prop_assert_eq!(config.selection.include_alternate_cuts, alternate_cuts);
            prop_assert_eq!(config.selection.titles.clone(), vec![0, 3]);
            prop_assert_eq!(config.streams.include_english_subtitles, subtitles);
        }

        #[test]
        fn prop_env_overrides_season_and_episode_start(
            initial_season in 1u32..10,
            override_season in 1u32..40,
            override_start in 1u32..30,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[naming]
season = {}
"#,
                initial_season
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("RIPPER_SEASON", override_season.to_string());
            env::set_var("RIPPER_EPISODE_START", override_start.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.naming.season, override_season);
            prop_assert_eq!(config.naming.episode_start, override_start);
        }

        #[test]
        fn prop_env_overrides_confidence_threshold(
            initial in 0.5f64..0.9,
            override_value in 0.0f64..1.0,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[classifier]
confidence_threshold = {}
"#,
                initial
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("RIPPER_CONFIDENCE_THRESHOLD", override_value.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert!((config.classifier.confidence_threshold - override_value).abs() < 1e-9);
        }

        #[test]
        fn prop_threshold_is_clamped(raw in -5.0f64..5.0) {
            let classifier = ClassifierConfig { confidence_threshold: raw };
            let effective = classifier.effective_threshold();
            prop_assert!((0.0..=1.0).contains(&effective));
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.disc.device, "disc:0");
        assert_eq!(config.disc.temp_dir, PathBuf::from("/tmp/makemkv"));
        assert_eq!(config.disc.output_dir, None);
        assert_eq!(config.disc.scan_timeout_secs, 300);
        assert_eq!(config.tools.makemkvcon, "makemkvcon");
        assert_eq!(config.tools.ffmpeg, "ffmpeg");
        assert_eq!(config.tools.ffprobe, "ffprobe");
        assert_eq!(config.pipeline.mode, PipelineMode::Parallel);
        assert_eq!(config.pipeline.poll_interval_ms, 500);
        assert!(config.pipeline.raw_log);
        assert!((config.classifier.confidence_threshold - 0.70).abs() < 1e-9);
        assert_eq!(config.naming.season, 1);
        assert_eq!(config.naming.episode_start, 1);
        assert!(!config.selection.include_alternate_cuts);
        assert!(config.selection.titles.is_empty());
        assert!(config.streams.include_english_subtitles);
        assert_eq!(config.metadata.catalog, None);
        assert_eq!(config.metadata.cache_ttl_secs, 3600);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[disc]
device = "dev:/dev/sr1"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.disc.device, "dev:/dev/sr1");
        assert_eq!(config.disc.temp_dir, PathBuf::from("/tmp/makemkv")); // default
        assert_eq!(config.pipeline.mode, PipelineMode::Parallel); // default
        assert_eq!(config.naming.season, 1); // default
    }

    #[test]
    fn test_invalid_mode_is_rejected_by_parser() {
        let toml_str = r#"
[pipeline]
mode = "turbo"
"#;
        assert!(matches!(Config::parse_toml(toml_str), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_env_values_keep_existing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("RIPPER_PIPELINE_MODE", "turbo");
        env::set_var("RIPPER_SEASON", "two");
        env::set_var("RIPPER_INCLUDE_SUBTITLES", "maybe");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.pipeline.mode, PipelineMode::Parallel);
        assert_eq!(config.naming.season, 1);
        assert!(config.streams.include_english_subtitles);
    }

    #[test]
    fn test_env_overrides_paths_and_mode() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("RIPPER_DISC", "dev:/dev/sr0");
        env::set_var("RIPPER_TEMP_DIR", "/scratch/rips");
        env::set_var("RIPPER_OUTPUT_DIR", "/media/tv");
        env::set_var("RIPPER_PIPELINE_MODE", "Sequential");
        env::set_var("RIPPER_INCLUDE_SUBTITLES", "no");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.disc.device, "dev:/dev/sr0");
        assert_eq!(config.disc.temp_dir, PathBuf::from("/scratch/rips"));
        assert_eq!(config.disc.output_dir, Some(PathBuf::from("/media/tv")));
        assert_eq!(config.pipeline.mode, PipelineMode::Sequential);
        assert!(!config.streams.include_english_subtitles);
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ripper.toml");
        fs::write(&path, "[naming]\nseason = 3\n").unwrap();

        let config = Config::load_from_file(&path).expect("file should load");
        assert_eq!(config.naming.season, 3);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = Config::load_from_file("/nonexistent/ripper.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
