//! Core library for the `weather-etl` pipeline.
//!
//! This crate defines:
//! - Configuration, secrets and retry/notification policy
//! - The weather endpoint (readiness probe and extraction)
//! - Unit conversion and CSV rendering of the single output record
//! - Object storage sinks (S3 and local directory)
//! - The sequential runner and the cron loop around it
//!
//! It is used by `weather-etl-cli`, but can also be driven by other binaries or services.

pub mod config;
pub mod error;
pub mod load;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod schedule;
pub mod secrets;
pub mod source;
pub mod storage;
pub mod transform;

pub use config::Config;
pub use error::{PipelineError, RunError, TaskId};
pub use model::{RawWeatherReading, WeatherRecord};
pub use pipeline::{Pipeline, RunReport};
pub use secrets::{EnvSecrets, SecretProvider, StaticSecrets};
pub use source::WeatherSource;
pub use storage::ObjectStore;
pub use transform::{TemperatureUnit, kelvin_to_celsius, kelvin_to_fahrenheit};
