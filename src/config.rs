//! Configuration types for sbspk

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{Error, Result};

/// Accepted calendar date formats for the kernel date range
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y-%b-%d"];

/// Horizons telnet endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server hostname (default: "horizons.jpl.nasa.gov")
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 6775)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum time to establish the connection (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Per-retrieval session settings
///
/// Immutable for the duration of a negotiation; the session driver only
/// borrows it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Contact e-mail registered with the service when generating the kernel
    #[serde(default = "default_email")]
    pub email: String,

    /// Kernel start date (default: "2010-01-01")
    #[serde(default = "default_start_date")]
    pub start_date: String,

    /// Kernel stop date (default: "2040-01-01")
    #[serde(default = "default_stop_date")]
    pub stop_date: String,

    /// Kernel file name template (default: "<OBJID>_<TARGET>.bsp")
    ///
    /// `<OBJID>` is replaced with the SPK object ID reported by the service and
    /// `<TARGET>` with the body name. Existing files are overwritten without warning.
    #[serde(default = "default_file_format")]
    pub file_format: String,

    /// Maximum time to wait for each expected prompt (default: 5 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Emit transfer progress events (default: false)
    #[serde(default)]
    pub progress: bool,

    /// Record number to pick when the service lists several matching bodies
    #[serde(default)]
    pub selection: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            email: default_email(),
            start_date: default_start_date(),
            stop_date: default_stop_date(),
            file_format: default_file_format(),
            timeout: default_timeout(),
            progress: false,
            selection: None,
        }
    }
}

/// Retry configuration for whole-negotiation restarts
///
/// The session driver never retries on its own; the retriever restarts a
/// complete negotiation when the failure is transient.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of restarts (default: 0, no restart)
    #[serde(default)]
    pub max_attempts: u32,

    /// Initial delay before first restart (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between restarts (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for [`SpkRetriever`](crate::SpkRetriever)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Service endpoint
    #[serde(default)]
    pub server: ServerConfig,

    /// Negotiation settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Restart policy for failed negotiations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Directory kernel files are written to (default: current directory)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum negotiations running at once (default: 1)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            retry: RetryConfig::default(),
            output_dir: default_output_dir(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their defaults, so a file may contain only the
    /// settings it overrides.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Check the configuration before any connection is made
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::config("host must not be empty", "server.host"));
        }
        if self.server.port == 0 {
            return Err(Error::config("port must not be 0", "server.port"));
        }
        if self.server.connect_timeout.is_zero() {
            return Err(Error::config(
                "connect timeout must be positive",
                "server.connect_timeout",
            ));
        }
        if self.max_concurrent == 0 {
            return Err(Error::config(
                "max_concurrent must be at least 1",
                "max_concurrent",
            ));
        }
        self.session.validate()
    }
}

impl SessionConfig {
    /// Check the session settings
    ///
    /// The e-mail address is only checked for presence; the service validates it.
    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() {
            return Err(Error::config("contact e-mail is required", "session.email"));
        }
        if self.file_format.trim().is_empty() {
            return Err(Error::config(
                "file name template must not be empty",
                "session.file_format",
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be positive", "session.timeout"));
        }

        let start = parse_date(&self.start_date, "session.start_date")?;
        let stop = parse_date(&self.stop_date, "session.stop_date")?;
        if stop <= start {
            return Err(Error::config(
                format!(
                    "stop date {} is not after start date {}",
                    self.stop_date, self.start_date
                ),
                "session.stop_date",
            ));
        }
        Ok(())
    }
}

fn parse_date(value: &str, key: &str) -> Result<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value.trim(), format).ok())
        .ok_or_else(|| {
            Error::config(
                format!("'{value}' is not a calendar date (expected YYYY-MM-DD)"),
                key,
            )
        })
}

fn default_host() -> String {
    "horizons.jpl.nasa.gov".to_string()
}

fn default_port() -> u16 {
    6775
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_email() -> String {
    "sorry@noemail.org".to_string()
}

fn default_start_date() -> String {
    "2010-01-01".to_string()
}

fn default_stop_date() -> String {
    "2040-01-01".to_string()
}

fn default_file_format() -> String {
    "<OBJID>_<TARGET>.bsp".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_concurrent() -> usize {
    1
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
