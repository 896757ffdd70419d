use crate::{config::SourceConfig, error::Result, secrets::SecretProvider};
use async_trait::async_trait;
use std::fmt::Debug;

pub mod openweather;

pub use openweather::OpenWeatherSource;

/// The weather endpoint as seen by the first two tasks.
#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    /// Endpoint description safe to log (no credentials).
    fn describe(&self) -> String;

    /// One readiness probe. `Ok` means the endpoint answered 2xx.
    async fn probe(&self) -> Result<()>;

    /// Fetch current conditions and return the parsed JSON body.
    async fn extract(&self) -> Result<serde_json::Value>;
}

/// HTTP client shared by the source and the storage sink.
pub fn http_client(config: &SourceConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(config.timeout()).build()?)
}

/// Construct the OpenWeather source from config, resolving the API key.
pub fn source_from_config(
    config: &SourceConfig,
    secrets: &dyn SecretProvider,
    http: reqwest::Client,
) -> anyhow::Result<Box<dyn WeatherSource>> {
    let api_key = crate::secrets::resolve_api_key(secrets, config.api_key.as_deref())?;

    Ok(Box::new(OpenWeatherSource::new(
        config.base_url.clone(),
        config.city.clone(),
        api_key,
        http,
    )))
}
