use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inquire::{Password, Select, Text};
use log::info;
use weather_etl_core::{
    Config, EnvSecrets, Pipeline, TemperatureUnit,
    load::render_csv,
    schedule::{Schedule, run_on_schedule},
    source::{http_client, source_from_config},
    storage::StorageUri,
    transform::{decode, transform},
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-etl", version, about = "Weather extract / transform / load pipeline")]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute one run now: readiness check, extraction, transform & load.
    Run,

    /// Probe the weather endpoint once.
    Check,

    /// Fetch current conditions and print the JSON body.
    Extract,

    /// Transform a saved JSON reading and print the CSV.
    Transform {
        /// File containing a `/data/2.5/weather` response.
        file: PathBuf,
    },

    /// Run on the configured schedule until interrupted.
    Schedule,

    /// Interactively edit the config file.
    Configure,

    /// Inspect the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the config file location.
    Path,
    /// Print the effective configuration.
    Show,
}

impl Cli {
    fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Config::config_file_path(),
        }
    }

    fn load_config(&self) -> Result<Config> {
        Config::load_from(&self.config_path()?)
    }

    pub async fn run(self) -> Result<()> {
        match &self.command {
            Command::Run => {
                let cfg = self.load_config()?;
                let pipeline = Pipeline::from_config(&cfg, &EnvSecrets)?;
                let report = pipeline.run().await?;
                println!("{}", report.object_uri);
            }
            Command::Check => {
                let cfg = self.load_config()?;
                let http = http_client(&cfg.source)?;
                let source = source_from_config(&cfg.source, &EnvSecrets, http)?;
                source.probe().await?;
                println!("{} is ready", source.describe());
            }
            Command::Extract => {
                let cfg = self.load_config()?;
                let http = http_client(&cfg.source)?;
                let source = source_from_config(&cfg.source, &EnvSecrets, http)?;
                let body = source.extract().await?;
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
            Command::Transform { file } => {
                let cfg = self.load_config()?;
                let contents = std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let body: serde_json::Value = serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse {}", file.display()))?;

                let record = transform(&decode(&body)?, cfg.transform.unit)?;
                let csv = render_csv(&record, cfg.transform.timestamps)?;
                print!("{}", String::from_utf8_lossy(&csv));
            }
            Command::Schedule => {
                let cfg = self.load_config()?;
                let pipeline = Pipeline::from_config(&cfg, &EnvSecrets)?;
                let schedule = Schedule::from_config(&cfg.schedule)?;
                info!("Scheduling `{}` (Ctrl-C to stop)", cfg.schedule.cron);
                run_on_schedule(&pipeline, &schedule, tokio::signal::ctrl_c()).await?;
            }
            Command::Configure => {
                let path = self.config_path()?;
                let cfg = configure(Config::load_from(&path)?)?;
                cfg.save_to(&path)?;
                println!("Saved configuration to {}", path.display());
            }
            Command::Config { action: ConfigAction::Path } => {
                println!("{}", self.config_path()?.display());
            }
            Command::Config { action: ConfigAction::Show } => {
                let mut cfg = self.load_config()?;
                if cfg.source.api_key.is_some() {
                    cfg.source.api_key = Some("<redacted>".to_string());
                }
                print!("{}", toml::to_string_pretty(&cfg)?);
            }
        }

        Ok(())
    }
}

const UNITS: [&str; 2] = ["fahrenheit", "celsius"];

/// Index of the configured unit in `UNITS`.
fn unit_cursor(unit: TemperatureUnit) -> usize {
    UNITS
        .iter()
        .position(|u| TemperatureUnit::try_from(*u).ok() == Some(unit))
        .unwrap_or_default()
}

/// Walk through the settings most deployments change.
fn configure(mut cfg: Config) -> Result<Config> {
    let city = Text::new("City:").with_default(&cfg.source.city).prompt()?;
    cfg.source.city = city;

    let api_key = Password::new("OpenWeather API key (blank to keep current):")
        .without_confirmation()
        .prompt()?;
    if !api_key.is_empty() {
        cfg.source.api_key = Some(api_key);
    }

    let sink = Text::new("Storage sink (s3://bucket[/prefix] or file://dir):")
        .with_default(&cfg.sink.uri)
        .prompt()?;
    StorageUri::parse(&sink)?;
    cfg.sink.uri = sink;

    let unit = Select::new("Temperature unit:", UNITS.to_vec())
        .with_starting_cursor(unit_cursor(cfg.transform.unit))
        .prompt()?;
    cfg.transform.unit = TemperatureUnit::try_from(unit)?;

    let email = Text::new("Notification email (blank for none):")
        .with_default(&cfg.notify.email.join(","))
        .prompt()?;
    cfg.notify.email = email
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_owned)
        .collect();

    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_apply_to_subcommands() {
        let cli = Cli::try_parse_from(["weather-etl", "run", "--config", "/tmp/w.toml", "-v"])
            .unwrap();
        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/w.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn transform_takes_a_file() {
        let cli = Cli::try_parse_from(["weather-etl", "transform", "reading.json"]).unwrap();
        match cli.command {
            Command::Transform { file } => assert_eq!(file, PathBuf::from("reading.json")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unit_prompt_starts_on_configured_unit() {
        assert_eq!(UNITS[unit_cursor(TemperatureUnit::Fahrenheit)], "fahrenheit");
        assert_eq!(UNITS[unit_cursor(TemperatureUnit::Celsius)], "celsius");
    }

    #[test]
    fn config_requires_an_action() {
        assert!(Cli::try_parse_from(["weather-etl", "config"]).is_err());
        let cli = Cli::try_parse_from(["weather-etl", "config", "path"]).unwrap();
        assert!(matches!(cli.command, Command::Config { action: ConfigAction::Path }));
    }
}
