use chrono::TimeDelta;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tapedeck_common::paths::{PathTemplate, DEFAULT_RECORD_PATH};
use tapedeck_common::RecordFormat;

/// Name of the catch-all path entry.
pub const ALL_OTHERS: &str = "all_others";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default = "default_paths")]
    pub paths: Vec<PathConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            playback: PlaybackConfig::default(),
            paths: default_paths(),
        }
    }
}

impl Config {
    /// Resolve a stream name to its path configuration.
    ///
    /// Exact names win over `~regex` names, which win over `all_others`.
    pub fn find_path(&self, name: &str) -> Option<&PathConfig> {
        self.paths
            .iter()
            .find(|p| !p.is_regex() && p.name != ALL_OTHERS && p.name == name)
            .or_else(|| self.paths.iter().find(|p| p.is_regex() && p.matches(name)))
            .or_else(|| self.paths.iter().find(|p| p.name == ALL_OTHERS))
    }
}

fn default_paths() -> Vec<PathConfig> {
    vec![PathConfig::new(ALL_OTHERS)]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Require credentials on playback routes
    #[serde(default)]
    pub enabled: bool,

    /// API key for programmatic access (used with Authorization: Bearer header)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Username for HTTP basic authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Bcrypt hash of the password (generate with `tapedeck hash-password`)
    #[serde(default)]
    pub password_hash: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9996
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Base URL of the recording inventory service. Without it, recordings
    /// are found by scanning the record directories.
    #[serde(default)]
    pub inventory_url: Option<String>,

    /// Connect timeout for the inventory service
    #[serde(default = "default_inventory_timeout")]
    pub inventory_timeout_secs: u64,

    /// Largest gap between two segments that still counts as contiguous
    #[serde(default = "default_tolerance")]
    pub concatenation_tolerance_ms: u64,
}

fn default_inventory_timeout() -> u64 {
    5
}

fn default_tolerance() -> u64 {
    1000
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            inventory_url: None,
            inventory_timeout_secs: default_inventory_timeout(),
            concatenation_tolerance_ms: default_tolerance(),
        }
    }
}

impl PlaybackConfig {
    pub fn tolerance(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.concatenation_tolerance_ms as i64)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathConfig {
    /// Stream name, `~regex` or `all_others`
    pub name: String,

    /// Segment path template
    #[serde(default = "default_record_path")]
    pub record_path: String,

    #[serde(default)]
    pub record_format: RecordFormat,

    /// Target segment length; segments rotate on the next keyframe after it
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u64,

    /// Target fragment length inside a segment
    #[serde(default = "default_part_duration")]
    pub part_duration_secs: f64,

    /// Serve recordings of this path
    #[serde(default = "default_playback")]
    pub playback: bool,

    #[serde(skip)]
    pub matcher: Option<Regex>,
}

fn default_record_path() -> String {
    DEFAULT_RECORD_PATH.to_string()
}

fn default_segment_duration() -> u64 {
    3600
}

fn default_part_duration() -> f64 {
    1.0
}

fn default_playback() -> bool {
    true
}

impl PathConfig {
    /// Path entry with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            record_path: default_record_path(),
            record_format: RecordFormat::default(),
            segment_duration_secs: default_segment_duration(),
            part_duration_secs: default_part_duration(),
            playback: default_playback(),
            matcher: None,
        }
    }

    pub fn with_record_path(mut self, record_path: impl Into<String>) -> Self {
        self.record_path = record_path.into();
        self
    }

    pub fn is_regex(&self) -> bool {
        self.name.starts_with('~')
    }

    /// Whether a `~regex` entry matches the stream name.
    pub fn matches(&self, stream: &str) -> bool {
        if !self.is_regex() {
            return self.name == stream;
        }
        match &self.matcher {
            Some(re) => re.is_match(stream),
            None => Regex::new(&self.name[1..])
                .map(|re| re.is_match(stream))
                .unwrap_or(false),
        }
    }

    pub fn template(&self) -> PathTemplate {
        PathTemplate::new(self.record_path.as_str())
    }

    pub fn segment_duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.segment_duration_secs as i64)
    }

    pub fn part_duration(&self) -> TimeDelta {
        TimeDelta::microseconds((self.part_duration_secs * 1e6) as i64)
    }
}
