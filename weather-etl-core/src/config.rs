use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{load::TimestampStyle, transform::TemperatureUnit};

/// Top-level pipeline configuration stored on disk.
///
/// Every section may be omitted; missing fields take the defaults below.
///
/// Example TOML:
/// ```toml
/// owner = "data-team"
///
/// [source]
/// city = "boston"
///
/// [sink]
/// uri = "s3://weatherapis3bucket-yml"
///
/// [notify]
/// email = ["oncall@example.com"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Owner shown in notifications.
    pub owner: String,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub transform: TransformConfig,
    pub retry: RetryConfig,
    pub sensor: SensorConfig,
    pub notify: NotifyConfig,
    pub schedule: ScheduleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: "weather-etl".to_string(),
            source: SourceConfig::default(),
            sink: SinkConfig::default(),
            transform: TransformConfig::default(),
            retry: RetryConfig::default(),
            sensor: SensorConfig::default(),
            notify: NotifyConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

/// Weather endpoint. Defaults: OpenWeather, `boston`, 30 s timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub city: String,
    /// Used only when `WEATHER_API_KEY` is not set.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org".to_string(),
            city: "boston".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where the CSV object goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// `s3://bucket[/prefix]` or `file://dir[/prefix]`.
    pub uri: String,
    pub region: String,
    /// Custom S3-compatible endpoint; switches to path-style addressing.
    pub endpoint: Option<String>,
    pub file_prefix: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            uri: "s3://weatherapis3bucket-yml".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            file_prefix: "current_weather_data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub unit: TemperatureUnit,
    pub timestamps: TimestampStyle,
}

/// Per-task retry policy. Defaults: 2 retries, 2 minutes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { retries: 2, retry_delay_secs: 120 }
    }
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Readiness polling. Defaults: probe every 60 s for up to 10 minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub poke_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { poke_interval_secs: 60, timeout_secs: 600 }
    }
}

impl SensorConfig {
    pub fn poke_interval(&self) -> Duration {
        Duration::from_secs(self.poke_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Failure and retry notifications. No recipients by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub email: Vec<String>,
    pub on_failure: bool,
    pub on_retry: bool,
    /// Without an SMTP relay, notifications are only logged.
    pub smtp: Option<SmtpConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { email: Vec::new(), on_failure: true, on_retry: true, smtp: None }
    }
}

/// SMTP relay. The password comes from `SMTP_PASSWORD`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub from: String,
    #[serde(default)]
    pub tls: SmtpTls,
}

fn default_smtp_port() -> u16 {
    587
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    /// Plaintext greeting upgraded with `STARTTLS` (submission, port 587).
    #[default]
    Starttls,
    /// TLS from the first byte (port 465).
    Wrapper,
    /// No encryption. Only for local relays.
    None,
}

/// Defaults: once a day, from 2024-09-12, no catch-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cron: String,
    pub start_date: NaiveDate,
    pub catchup: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: "@daily".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 9, 12).unwrap_or_default(),
            catchup: false,
        }
    }
}

impl Config {
    /// Load config from the platform location, or defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Load config from `path`, or defaults if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-etl", "weather-etl")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Reject settings the runner cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.source.city.trim().is_empty() {
            bail!("`source.city` must not be empty");
        }
        if self.sensor.poke_interval_secs == 0 {
            bail!("`sensor.poke_interval_secs` must be at least 1");
        }
        if self.schedule.catchup {
            bail!(
                "`schedule.catchup = true` is not supported; missed runs are never backfilled"
            );
        }
        if self.notify.smtp.is_some() && self.notify.email.is_empty() {
            bail!("`notify.smtp` is set but `notify.email` lists no recipients");
        }
        Ok(())
    }
}
