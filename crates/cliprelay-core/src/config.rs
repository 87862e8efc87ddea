//! Configuration loading for cliprelay.
//!
//! Resolution order:
//! 1. Built-in defaults
//! 2. TOML config file (`cliprelay.toml` unless overridden)
//! 3. Environment variables
//!
//! The result is validated once; any failure is fatal at startup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cliprelay.toml";

/// Streaming platform a destination pushes to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitch,
}

impl Platform {
    /// Every supported platform.
    pub const ALL: [Self; 1] = [Self::Twitch];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Twitch => "twitch",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no supported platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown platform: {0}")]
pub struct ParsePlatformError(pub String);

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParsePlatformError(s.to_string()))
    }
}

/// How the selector picks a clip when the explicit queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickStrategy {
    /// Uniform random choice over the cached clip list.
    #[default]
    Random,
    /// Anything else in the config file. Only queued clips are served.
    #[serde(other)]
    Unrecognized,
}

/// Where the catalog lists and reads clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A local directory tree under `catalog.root`.
    #[default]
    Disk,
    /// An S3-compatible bucket described by `catalog.s3`.
    S3,
}

/// Complete cliprelay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the ffmpeg binary used as the muxer.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
    #[serde(default)]
    pub relay: RelayConfig,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

/// Clip catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub source: SourceKind,
    /// Directory the disk source lists and reads clips from.
    #[serde(default)]
    pub root: PathBuf,
    /// Bucket settings, required when `source = "s3"`.
    #[serde(default)]
    pub s3: Option<S3Config>,
    /// Listing prefix, relative to `root` or the bucket.
    #[serde(default)]
    pub prefix: String,
    /// Only keys ending with this extension are selectable.
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub pick_strategy: PickStrategy,
    /// Explicit clip list. When non-empty it seeds the catalog instead of a listing.
    #[serde(default)]
    pub files: Vec<String>,
    /// Scheduled refresh period in seconds; 0 disables it.
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

fn default_extension() -> String {
    ".ts".to_string()
}

impl CatalogConfig {
    fn validate_source(&self) -> Result<()> {
        match self.source {
            SourceKind::Disk => {
                if self.root.as_os_str().is_empty() {
                    return Err(Error::Config("catalog root not specified".to_string()));
                }
            }
            SourceKind::S3 => {
                let Some(s3) = &self.s3 else {
                    return Err(Error::Config(
                        "catalog source is s3 but [catalog.s3] is missing".to_string(),
                    ));
                };
                if s3.bucket.trim().is_empty() {
                    return Err(Error::Config("s3 bucket not specified".to_string()));
                }
                if s3.endpoint.trim().is_empty() {
                    return Err(Error::Config("s3 endpoint not specified".to_string()));
                }
                if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
                    return Err(Error::Config(
                        "s3 access_key_id and secret_access_key must be set together"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Scheduled refresh period, if enabled.
    pub const fn refresh_interval(&self) -> Option<Duration> {
        if self.refresh_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.refresh_interval_secs))
        }
    }
}

/// S3-compatible bucket. Requests use path-style addressing.
#[derive(Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    /// Service endpoint, e.g. `https://s3.amazonaws.com` or a MinIO URL.
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Static credentials. Left unset, the ambient AWS environment is used.
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// One streaming destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub platform: Platform,
    /// File holding the stream key. May be omitted and set at runtime instead.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Ingest endpoint override; the stream key is appended to it.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl DestinationConfig {
    /// Read the stream key from `token_file`, trimming whitespace and newlines.
    pub fn read_token(&self) -> Result<Option<String>> {
        let Some(path) = &self.token_file else {
            return Ok(None);
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read stream key file {} for {}: {}",
                path.display(),
                self.platform,
                e
            ))
        })?;
        let token = raw.trim().to_string();
        if token.is_empty() {
            return Err(Error::Config(format!(
                "Stream key file {} for {} is empty",
                path.display(),
                self.platform
            )));
        }
        Ok(Some(token))
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Lifetime of an offered stream key ticket.
    pub key_exchange_ttl_secs: u64,
    /// Maximum number of outstanding tickets.
    pub key_exchange_capacity: usize,
    /// Grace period for the muxer to exit after its input is closed; 0 kills immediately.
    pub stop_grace_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            key_exchange_ttl_secs: 300,
            key_exchange_capacity: 64,
            stop_grace_ms: 0,
        }
    }
}

impl RelayConfig {
    pub const fn key_exchange_ttl(&self) -> Duration {
        Duration::from_secs(self.key_exchange_ttl_secs)
    }

    pub const fn stop_grace(&self) -> Option<Duration> {
        if self.stop_grace_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.stop_grace_ms))
        }
    }
}

impl Config {
    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.destinations.is_empty() {
            return Err(Error::Config("empty 'destinations' list".to_string()));
        }

        let mut seen = Vec::with_capacity(self.destinations.len());
        for dest in &self.destinations {
            if seen.contains(&dest.platform) {
                return Err(Error::Config(format!(
                    "duplicate destination for platform: {}",
                    dest.platform
                )));
            }
            seen.push(dest.platform);
            // Surface unreadable key files now rather than on first start.
            dest.read_token()?;
        }

        self.catalog.validate_source()?;
        if self.catalog.extension.is_empty() {
            return Err(Error::Config("catalog extension is empty".to_string()));
        }
        if self.catalog.pick_strategy == PickStrategy::Unrecognized {
            warn!("Unrecognized pick strategy, only queued clips will be streamed");
        }
        if self.relay.key_exchange_capacity == 0 {
            return Err(Error::Config(
                "key_exchange_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse a config document without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Load, override and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    debug!(path = %path.display(), "Loading config file");
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("CLIPRELAY_FFMPEG_PATH") {
        config.ffmpeg_path = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("CLIPRELAY_CATALOG_ROOT") {
        config.catalog.root = PathBuf::from(val);
    }
    if let Some(s3) = config.catalog.s3.as_mut() {
        if let Ok(val) = std::env::var("CLIPRELAY_S3_ACCESS_KEY_ID") {
            s3.access_key_id = Some(val);
        }
        if let Ok(val) = std::env::var("CLIPRELAY_S3_SECRET_ACCESS_KEY") {
            s3.secret_access_key = Some(val);
        }
    }
}
